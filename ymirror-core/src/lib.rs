mod client;

pub use client::{
    DiskClient, DiskError, DiskInfo, ErrorClass, MoveResult, OperationStatus, Resource,
    ResourceType, TransferLink, classify_status,
};
