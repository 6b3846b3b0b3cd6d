impl<R: RemoteStore> MirrorEngine<R> {
    async fn execute_mkdir(&self, path: &str) -> Result<ExecOutcome, CycleError> {
        if self.is_shadowed(path) {
            return Ok(ExecOutcome::Skipped {
                path: path.to_string(),
            });
        }
        let mut remote_id = self
            .retry_op("mkdir", path, || self.remote.ensure_folder(path))
            .await?;
        if self.verify_uploads {
            match self.verify_round_trip(path, None).await? {
                VerifyResult::Accepted(id) => {
                    if id.is_some() {
                        remote_id = id;
                    }
                }
                VerifyResult::NameMismatch => {
                    self.mark_skipped(path);
                    return Ok(ExecOutcome::Skipped {
                        path: path.to_string(),
                    });
                }
            }
        }
        Ok(ExecOutcome::Done {
            path: path.to_string(),
            remote_id,
            resumed_rename: false,
        })
    }

    async fn execute_upload(
        &self,
        path: String,
        fingerprint: Fingerprint,
    ) -> Result<ExecOutcome, CycleError> {
        if self.is_shadowed(&path) {
            return Ok(ExecOutcome::Skipped { path });
        }
        let source = self.local_path(&path);

        // A disguised upload from an earlier cycle may only be missing its
        // rename; retry that before re-sending the bytes.
        let mut resumed = false;
        if let Some(pending) = self.take_pending(&path)
            && pending.fingerprint.same_content(&fingerprint)
        {
            let renamed = self
                .retry_op("rename", &path, || {
                    self.remote.rename(&pending.disguised, &path)
                })
                .await;
            match renamed {
                Ok(()) => resumed = true,
                Err(err) if matches!(err.classification(), Some(ErrorClass::Permanent)) => {
                    eprintln!(
                        "[ymirrord] resumed rename for {path} failed, re-uploading: {err}"
                    );
                }
                Err(err) => {
                    self.store_pending(PendingUpload {
                        attempts: pending.attempts.saturating_add(1),
                        last_error: Some(err.to_string()),
                        ..pending
                    });
                    return Err(err);
                }
            }
        }

        if !resumed {
            match self.policy.disguise(&path) {
                Some(disguised) => {
                    self.retry_op("upload", &path, || self.remote.put(&disguised, &source))
                        .await?;
                    let renamed = self
                        .retry_op("rename", &path, || self.remote.rename(&disguised, &path))
                        .await;
                    if let Err(err) = renamed {
                        self.store_pending(PendingUpload {
                            path: path.clone(),
                            disguised,
                            fingerprint,
                            attempts: 1,
                            last_error: Some(err.to_string()),
                        });
                        return Err(err);
                    }
                }
                None => {
                    self.retry_op("upload", &path, || self.remote.put(&path, &source))
                        .await?;
                }
            }
        }

        let mut remote_id = None;
        if self.verify_uploads {
            match self.verify_round_trip(&path, Some(&fingerprint)).await? {
                VerifyResult::Accepted(id) => remote_id = id,
                VerifyResult::NameMismatch => {
                    self.mark_skipped(&path);
                    return Ok(ExecOutcome::Skipped { path });
                }
            }
        }
        Ok(ExecOutcome::Done {
            path,
            remote_id,
            resumed_rename: resumed,
        })
    }

    async fn execute_delete(
        &self,
        path: &str,
        previous: &Snapshot,
    ) -> Result<ExecOutcome, CycleError> {
        if self.is_shadowed(path) {
            return Ok(ExecOutcome::Skipped {
                path: path.to_string(),
            });
        }
        let recursive = previous
            .get(path)
            .map(|entry| entry.is_dir())
            .unwrap_or(false);
        self.retry_op("delete", path, || self.remote.delete(path, recursive))
            .await?;
        // A deleted path has no rename left to finish.
        self.pending.lock().unwrap().remove(path);
        Ok(ExecOutcome::Done {
            path: path.to_string(),
            remote_id: None,
            resumed_rename: false,
        })
    }

    /// Stat after a create. The store must report the path back under the
    /// exact name we sent; a mangled name would bounce between delete and
    /// re-create every cycle.
    async fn verify_round_trip(
        &self,
        path: &str,
        expected: Option<&Fingerprint>,
    ) -> Result<VerifyResult, CycleError> {
        let entry = self
            .retry_op("stat", path, || self.remote.stat(path))
            .await?;
        let Some(entry) = entry else {
            return Ok(VerifyResult::NameMismatch);
        };
        if entry.name != file_name(path) {
            return Ok(VerifyResult::NameMismatch);
        }
        if let Some(expected) = expected
            && let Some(md5) = &entry.md5
            && *md5 != expected.md5
        {
            eprintln!(
                "[ymirrord] verify {path}: remote md5 {md5} differs from local {}",
                expected.md5
            );
        }
        Ok(VerifyResult::Accepted(entry.remote_id))
    }

    async fn retry_op<T, F, Fut>(
        &self,
        op: &'static str,
        path: &str,
        mut call: F,
    ) -> Result<T, CycleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            match err.classification() {
                ErrorClass::Auth | ErrorClass::Permanent => {
                    eprintln!("[ymirrord] {op} {path} failed: {err}");
                    return Err(CycleError::Failed {
                        op,
                        path: path.to_string(),
                        source: err,
                    });
                }
                ErrorClass::RateLimit | ErrorClass::Transient => {
                    if attempt >= self.max_attempts {
                        eprintln!(
                            "[ymirrord] {op} {path} giving up after {attempt} attempts: {err}"
                        );
                        return Err(CycleError::RetriesExhausted {
                            op,
                            path: path.to_string(),
                            attempts: attempt,
                            source: err,
                        });
                    }
                    let mut delay = self.backoff.delay(attempt);
                    if let Some(secs) = err.retry_after_secs() {
                        delay = delay.max(Duration::from_secs(secs));
                    }
                    eprintln!(
                        "[ymirrord] {op} {path} attempt {attempt} failed, retrying in {}ms: {err}",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn local_path(&self, rel: &str) -> PathBuf {
        let mut out = self.local_root.clone();
        for segment in rel.split('/') {
            out.push(segment);
        }
        out
    }

    fn take_pending(&self, path: &str) -> Option<PendingUpload> {
        self.pending.lock().unwrap().remove(path)
    }

    fn store_pending(&self, pending: PendingUpload) {
        eprintln!(
            "[ymirrord] upload of {} parked: rename from {} not completed (attempt {})",
            pending.path, pending.disguised, pending.attempts
        );
        self.pending
            .lock()
            .unwrap()
            .insert(pending.path.clone(), pending);
    }

    fn mark_skipped(&self, path: &str) {
        let mut skipped = self.skipped.lock().unwrap();
        if skipped.insert(path.to_string()) {
            eprintln!(
                "[ymirrord] remote name for {path} does not round-trip; skipping this path from now on"
            );
        }
    }

    fn is_shadowed(&self, path: &str) -> bool {
        let skipped = self.skipped.lock().unwrap();
        skipped.contains(path)
            || skipped
                .iter()
                .any(|root| is_strictly_under(root, path))
    }
}
