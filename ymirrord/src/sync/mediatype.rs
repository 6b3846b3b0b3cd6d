use std::collections::BTreeSet;

/// Coarse media class the remote infers from a file's advertised type when
/// an upload link is acquired. Inference here is a pure function of the
/// extension; the bytes are never inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MediaCategory {
    Archive,
    Video,
    Audio,
    Image,
    Binary,
    Document,
    Other,
}

impl MediaCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaCategory::Archive => "archive",
            MediaCategory::Video => "video",
            MediaCategory::Audio => "audio",
            MediaCategory::Image => "image",
            MediaCategory::Binary => "binary",
            MediaCategory::Document => "document",
            MediaCategory::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "archive" => Some(MediaCategory::Archive),
            "video" => Some(MediaCategory::Video),
            "audio" => Some(MediaCategory::Audio),
            "image" => Some(MediaCategory::Image),
            "binary" => Some(MediaCategory::Binary),
            "document" => Some(MediaCategory::Document),
            "other" => Some(MediaCategory::Other),
            _ => None,
        }
    }
}

pub fn category_for(path: &str) -> MediaCategory {
    let name = path.rsplit('/').next().unwrap_or(path);
    let Some((_, extension)) = name.rsplit_once('.') else {
        return MediaCategory::Other;
    };
    match extension.to_ascii_lowercase().as_str() {
        "zip" | "rar" | "7z" | "tar" | "gz" | "tgz" | "bz2" | "xz" | "zst" => {
            MediaCategory::Archive
        }
        "mp4" | "mkv" | "avi" | "mov" | "wmv" | "flv" | "webm" | "m4v" | "mpg" | "mpeg" | "ts" => {
            MediaCategory::Video
        }
        "mp3" | "flac" | "ogg" | "wav" | "m4a" | "aac" | "opus" => MediaCategory::Audio,
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "heic" | "tif" | "tiff" => {
            MediaCategory::Image
        }
        "exe" | "dll" | "so" | "iso" | "img" | "bin" | "apk" | "deb" | "rpm" | "msi" | "dmg" => {
            MediaCategory::Binary
        }
        "txt" | "md" | "pdf" | "rtf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "odt"
        | "ods" | "csv" | "json" | "xml" | "html" | "htm" => MediaCategory::Document,
        _ => MediaCategory::Other,
    }
}

/// Extension appended to the remote path of a disguised upload. Neutral on
/// purpose: `category_for` maps it to `Other`, which is never throttled.
pub const DISGUISE_SUFFIX: &str = ".partial";

/// Which media categories get the upload-under-a-neutral-name treatment.
#[derive(Debug, Clone)]
pub struct ThrottlePolicy {
    throttled: BTreeSet<MediaCategory>,
}

impl ThrottlePolicy {
    pub fn new(throttled: BTreeSet<MediaCategory>) -> Self {
        Self { throttled }
    }

    pub fn is_throttled(&self, path: &str) -> bool {
        self.throttled.contains(&category_for(path))
    }

    /// Remote path to upload under instead of `path`, when mitigation
    /// applies.
    pub fn disguise(&self, path: &str) -> Option<String> {
        self.is_throttled(path)
            .then(|| format!("{path}{DISGUISE_SUFFIX}"))
    }
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            throttled: BTreeSet::from([
                MediaCategory::Archive,
                MediaCategory::Video,
                MediaCategory::Binary,
            ]),
        }
    }
}
