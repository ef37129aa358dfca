//! Parallel multipart transfers
//!
//! Drives a whole multipart sequence: plan the parts, open a session, run
//! every part exchange through a [`Scheduler`], then complete the session
//! with the ETag list in part order. A session the provider forgets midway
//! is restarted from scratch; any other failure leaves it open and reports
//! its upload id so the caller can abort it. Sessions given up on by a
//! restart are reported too, on success and on failure, since a provider
//! that answered `409 Conflict` may still hold their parts.

use std::sync::Arc;

use bfs_core::{
    Descriptor, Error, HeaderTable, MimeTable, MultipartReport, ObjectPath, Result, TransportConfig,
};

use crate::context::RequestContext;
use crate::multipart::{self, EtagList, MultipartSession, PartDescriptor, PartPlan};
use crate::scheduler::{CompletionHandler, Disposition, Scheduler};
use crate::transport::Transport;

/// Where the bytes of each part come from
#[derive(Debug, Clone)]
enum PartSource {
    Upload(Descriptor),
    Copy(ObjectPath),
}

/// Runs multipart uploads and server-side multipart copies
pub struct MultipartTransfer<'a> {
    transport: &'a Arc<dyn Transport>,
    config: &'a Arc<TransportConfig>,
    mime: &'a MimeTable,
}

impl<'a> MultipartTransfer<'a> {
    pub fn new(
        transport: &'a Arc<dyn Transport>,
        config: &'a Arc<TransportConfig>,
        mime: &'a MimeTable,
    ) -> Self {
        Self {
            transport,
            config,
            mime,
        }
    }

    /// Upload the whole of `file` to `path` in `multipart_size` parts.
    ///
    /// Returns `MultipartRejected` without contacting the provider when the
    /// file is empty or fits in one part.
    pub async fn upload(
        &self,
        path: &ObjectPath,
        meta: &HeaderTable,
        file: Descriptor,
    ) -> Result<MultipartReport> {
        let size = file.metadata()?.len();
        let plan = PartPlan::new(size, self.config.multipart_size)?;
        tracing::info!(
            path = %path,
            size,
            parts = plan.count,
            part_size = plan.part_size,
            "Starting multipart upload"
        );
        self.run(path, meta, PartSource::Upload(file), plan).await
    }

    /// Copy `size` bytes of `from` to `to` in `copy_part_size` server-side part copies.
    pub async fn rename(
        &self,
        from: &ObjectPath,
        to: &ObjectPath,
        meta: &HeaderTable,
        size: u64,
    ) -> Result<MultipartReport> {
        let plan = PartPlan::new(size, self.config.copy_part_size)?;
        tracing::info!(
            from = %from,
            to = %to,
            size,
            parts = plan.count,
            "Starting multipart copy"
        );
        self.run(to, meta, PartSource::Copy(from.clone()), plan).await
    }

    async fn run(
        &self,
        path: &ObjectPath,
        meta: &HeaderTable,
        source: PartSource,
        plan: PartPlan,
    ) -> Result<MultipartReport> {
        let mut abandoned = Vec::new();
        loop {
            let session =
                multipart::initiate(self.transport.as_ref(), self.config, self.mime, path, meta).await?;

            match self.transfer(&session, &source, &plan).await {
                Ok(retried) => {
                    return Ok(MultipartReport {
                        upload_id: session.upload_id,
                        parts: plan.count,
                        retried,
                        abandoned,
                    });
                }
                Err(e)
                    if e.is_session_lost()
                        && abandoned.len() + 1 < self.config.retry.max_attempts as usize =>
                {
                    tracing::warn!(
                        path = %path,
                        upload_id = %session.upload_id,
                        sequence = abandoned.len() + 1,
                        error = %e,
                        "Multipart session lost, starting over"
                    );
                    abandoned.push(session.upload_id);
                }
                Err(e) => {
                    tracing::error!(
                        path = %path,
                        upload_id = %session.upload_id,
                        abandoned = abandoned.len(),
                        error = %e,
                        "Multipart transfer failed, session left open"
                    );
                    return Err(Error::MultipartFailed {
                        upload_id: session.upload_id,
                        abandoned,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    /// Every part of one session, then its completion; returns the number
    /// of part resubmissions
    async fn transfer(
        &self,
        session: &MultipartSession,
        source: &PartSource,
        plan: &PartPlan,
    ) -> Result<usize> {
        let etags = EtagList::with_parts(plan.count);
        let mut scheduler = Scheduler::new(
            self.transport.clone(),
            self.config.max_parallel_upload,
            self.config.retry.clone(),
        );

        for (part_number, start, size) in plan.ranges() {
            let part = PartDescriptor::new(etags.slot(part_number as usize - 1), start, size);
            let exchange = match source {
                PartSource::Upload(file) => {
                    multipart::upload_part_request(self.config, session, file.clone(), part)?
                }
                PartSource::Copy(from) => multipart::copy_part_request(self.config, session, from, part),
            };
            scheduler.submit(exchange);
        }

        let mut handler = PartHandler {
            upload_id: &session.upload_id,
        };
        scheduler.run(&mut handler).await?;
        let retried = scheduler.stats().retried;
        tracing::debug!(
            upload_id = %session.upload_id,
            parts = etags.filled(),
            retried,
            "All parts stored"
        );

        multipart::complete(self.transport.as_ref(), self.config, session, &etags).await?;
        Ok(retried)
    }
}

/// Records finished parts and turns part failures into session decisions
struct PartHandler<'a> {
    upload_id: &'a str,
}

impl CompletionHandler for PartHandler<'_> {
    fn on_finished(&mut self, mut exchange: RequestContext, outcome: Result<()>) -> Disposition {
        match outcome {
            Ok(()) => match exchange.commit_part() {
                Ok(()) => Disposition::Accept,
                Err(e) => Disposition::Fail(e),
            },
            Err(e) if e.is_session_lost() => Disposition::Fail(Error::SessionLost {
                upload_id: self.upload_id.to_string(),
            }),
            Err(e) if e.is_retryable() => {
                tracing::debug!(
                    path = %exchange.path(),
                    part = exchange.part().map(|p| p.part_number()).unwrap_or_default(),
                    error = %e,
                    "Part failed, resubmitting"
                );
                Disposition::RetryWith(exchange.replacement())
            }
            Err(e) => Disposition::Fail(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Recorded, ScriptedResponse, ScriptedTransport};
    use bfs_core::RetryConfig;
    use reqwest::Method;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const MIB: u64 = 1024 * 1024;

    fn config(parallel: usize) -> Arc<TransportConfig> {
        let mut config = TransportConfig::new("http://localhost:9000", "bucket", "ak", "sk");
        config.multipart_size = 5 * MIB;
        config.copy_part_size = 5 * MIB;
        config.max_parallel_upload = parallel;
        config.retry = RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        };
        Arc::new(config)
    }

    /// Content where every 4 KiB block has its own byte value, so a range
    /// read from the wrong offset never matches
    fn pattern(size: u64) -> Vec<u8> {
        (0..size).map(|i| (i / 4096) as u8).collect()
    }

    fn file_with(content: &[u8]) -> Descriptor {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(content).unwrap();
        Arc::new(file)
    }

    fn file_of(size: u64) -> Descriptor {
        file_with(&pattern(size))
    }

    fn part_number(request: &Recorded) -> Option<u32> {
        let (_, query) = request.url.split_once('?')?;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("partNumber="))?
            .parse()
            .ok()
    }

    fn initiated(upload_id: &str) -> ScriptedResponse {
        ScriptedResponse::ok().with_body(format!(
            "<InitiateMultipartUploadResult><Bucket>bucket</Bucket><UploadId>{upload_id}</UploadId></InitiateMultipartUploadResult>"
        ))
    }

    /// A well-behaved provider with upload id `u1`
    fn answer(request: &Recorded) -> ScriptedResponse {
        if request.method == Method::POST && request.url.ends_with("?uploads") {
            return initiated("u1");
        }
        if let Some(n) = part_number(request) {
            if request.header("x-amz-copy-source").is_some() {
                return ScriptedResponse::ok().with_body(format!(
                    "<CopyPartResult><ETag>\"copy-{n}\"</ETag></CopyPartResult>"
                ));
            }
            return ScriptedResponse::ok().with_header("ETag", &format!("\"etag-{n}\""));
        }
        ScriptedResponse::ok().with_body("<CompleteMultipartUploadResult/>")
    }

    fn completions(transport: &ScriptedTransport) -> Vec<Recorded> {
        transport
            .requests()
            .into_iter()
            .filter(|r| r.method == Method::POST && r.url.contains("?uploadId="))
            .collect()
    }

    fn path(p: &str) -> ObjectPath {
        ObjectPath::new(p).unwrap()
    }

    #[tokio::test]
    async fn test_upload_three_parts() {
        let config = config(5);
        let scripted = Arc::new(ScriptedTransport::new(answer));
        let transport: Arc<dyn Transport> = scripted.clone();
        let mime = MimeTable::new();

        let content = pattern(15 * MIB);

        let report = MultipartTransfer::new(&transport, &config, &mime)
            .upload(&path("/big.bin"), &HeaderTable::new(), file_with(&content))
            .await
            .unwrap();
        assert_eq!(report.upload_id, "u1");
        assert_eq!(report.parts, 3);
        assert_eq!(report.retried, 0);
        assert!(report.abandoned.is_empty());

        let requests = scripted.requests();
        assert_eq!(requests.len(), 5);
        assert!(requests[0].url.ends_with("/bucket/big.bin?uploads"));

        let mut parts: Vec<_> = requests.iter().filter_map(|r| part_number(r).map(|n| (n, r))).collect();
        parts.sort_by_key(|(n, _)| *n);
        assert_eq!(parts.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![1, 2, 3]);
        for (n, request) in parts {
            assert_eq!(request.method, Method::PUT);
            assert!(request.url.contains("uploadId=u1"));
            let start = (n as u64 - 1) * 5 * MIB;
            let expected = &content[start as usize..(start + 5 * MIB) as usize];
            assert_eq!(request.body.len(), expected.len(), "part {n}");
            assert!(request.body == expected, "part {n} carries the wrong range");
        }

        let complete = completions(&scripted);
        assert_eq!(complete.len(), 1);
        let body = complete[0].body_str();
        let first = body.find("<PartNumber>1</PartNumber>").unwrap();
        let second = body.find("<PartNumber>2</PartNumber>").unwrap();
        let third = body.find("<PartNumber>3</PartNumber>").unwrap();
        assert!(first < second && second < third);
        assert!(body.contains("<ETag>\"etag-3\"</ETag>"));
    }

    #[tokio::test]
    async fn test_etags_stay_in_part_order() {
        let config = config(5);
        // parts finish in the order 3, 1, 2
        let scripted = Arc::new(ScriptedTransport::new(|request| {
            let response = answer(request);
            match part_number(request) {
                Some(1) => response.after(Duration::from_millis(30)),
                Some(2) => response.after(Duration::from_millis(60)),
                _ => response,
            }
        }));
        let transport: Arc<dyn Transport> = scripted.clone();
        let mime = MimeTable::new();

        MultipartTransfer::new(&transport, &config, &mime)
            .upload(&path("/big.bin"), &HeaderTable::new(), file_of(15 * MIB))
            .await
            .unwrap();

        let body = completions(&scripted)[0].body_str();
        let one = body.find("etag-1").unwrap();
        let two = body.find("etag-2").unwrap();
        let three = body.find("etag-3").unwrap();
        assert!(one < two && two < three);
    }

    #[tokio::test]
    async fn test_parts_respect_parallel_limit() {
        let config = config(2);
        let scripted = Arc::new(ScriptedTransport::new(|request| {
            answer(request).after(Duration::from_millis(10))
        }));
        let transport: Arc<dyn Transport> = scripted.clone();
        let mime = MimeTable::new();

        MultipartTransfer::new(&transport, &config, &mime)
            .upload(&path("/five.bin"), &HeaderTable::new(), file_of(25 * MIB))
            .await
            .unwrap();

        let parts = scripted.requests().iter().filter(|r| part_number(r).is_some()).count();
        assert_eq!(parts, 5);
        assert_eq!(scripted.peak_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_failed_part_skips_completion() {
        let config = config(5);
        let scripted = Arc::new(ScriptedTransport::new(|request| match part_number(request) {
            Some(2) => ScriptedResponse::status(500),
            _ => answer(request),
        }));
        let transport: Arc<dyn Transport> = scripted.clone();
        let mime = MimeTable::new();

        let err = MultipartTransfer::new(&transport, &config, &mime)
            .upload(&path("/big.bin"), &HeaderTable::new(), file_of(15 * MIB))
            .await
            .unwrap_err();

        match err {
            Error::MultipartFailed {
                upload_id,
                abandoned,
                source,
            } => {
                assert_eq!(upload_id, "u1");
                assert!(abandoned.is_empty());
                assert!(matches!(*source, Error::RetriesExhausted { attempts: 3, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        let requests = scripted.requests();
        assert_eq!(requests.iter().filter(|r| part_number(r) == Some(2)).count(), 3);
        assert!(completions(&scripted).is_empty());
        assert!(requests.iter().all(|r| r.method != Method::DELETE));
    }

    #[tokio::test]
    async fn test_small_files_are_rejected_before_any_request() {
        let config = config(5);
        let scripted = Arc::new(ScriptedTransport::new(answer));
        let transport: Arc<dyn Transport> = scripted.clone();
        let mime = MimeTable::new();
        let transfer = MultipartTransfer::new(&transport, &config, &mime);

        for size in [0, 5 * MIB] {
            let err = transfer
                .upload(&path("/small.bin"), &HeaderTable::new(), file_of(size))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::MultipartRejected { .. }));
        }
        assert!(scripted.requests().is_empty());
    }

    #[tokio::test]
    async fn test_rename_copies_ranges() {
        let config = config(5);
        let scripted = Arc::new(ScriptedTransport::new(answer));
        let transport: Arc<dyn Transport> = scripted.clone();
        let mime = MimeTable::new();

        MultipartTransfer::new(&transport, &config, &mime)
            .rename(&path("/src.bin"), &path("/dst.bin"), &HeaderTable::new(), 12 * MIB)
            .await
            .unwrap();

        let requests = scripted.requests();
        let mut copies: Vec<_> = requests.iter().filter(|r| part_number(r).is_some()).collect();
        copies.sort_by_key(|r| part_number(r));
        assert_eq!(copies.len(), 3);
        for copy in &copies {
            assert!(copy.url.contains("/bucket/dst.bin?partNumber="));
            assert_eq!(copy.header("x-amz-copy-source"), Some("/bucket/src.bin"));
            assert!(copy.body.is_empty());
        }
        assert_eq!(copies[0].header("x-amz-copy-source-range"), Some("bytes=0-5242879"));
        assert_eq!(
            copies[2].header("x-amz-copy-source-range"),
            Some("bytes=10485760-12582911")
        );

        let body = completions(&scripted)[0].body_str();
        assert!(body.contains("<ETag>\"copy-1\"</ETag>"));
        assert!(body.contains("<ETag>\"copy-3\"</ETag>"));
    }

    #[tokio::test]
    async fn test_lost_session_restarts_sequence() {
        let config = config(1);
        let initiates = Arc::new(AtomicUsize::new(0));
        let counter = initiates.clone();
        let scripted = Arc::new(ScriptedTransport::new(move |request| {
            if request.method == Method::POST && request.url.ends_with("?uploads") {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                return initiated(&format!("u{n}"));
            }
            if part_number(request) == Some(2) && request.url.contains("uploadId=u1") {
                return ScriptedResponse::status(404).with_body(
                    "<Error><Code>NoSuchUpload</Code><Message>The specified upload does not exist</Message></Error>",
                );
            }
            answer(request)
        }));
        let transport: Arc<dyn Transport> = scripted.clone();
        let mime = MimeTable::new();

        let report = MultipartTransfer::new(&transport, &config, &mime)
            .upload(&path("/big.bin"), &HeaderTable::new(), file_of(15 * MIB))
            .await
            .unwrap();

        assert_eq!(initiates.load(Ordering::SeqCst), 2);
        assert_eq!(report.upload_id, "u2");
        assert_eq!(report.abandoned, vec!["u1".to_string()]);
        let complete = completions(&scripted);
        assert_eq!(complete.len(), 1);
        assert!(complete[0].url.ends_with("?uploadId=u2"));
    }

    #[tokio::test]
    async fn test_conflict_restart_reports_abandoned_session() {
        let config = config(2);
        let initiates = Arc::new(AtomicUsize::new(0));
        let counter = initiates.clone();
        let scripted = Arc::new(ScriptedTransport::new(move |request| {
            if request.method == Method::POST && request.url.ends_with("?uploads") {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                return initiated(&format!("u{n}"));
            }
            if part_number(request) == Some(1) && !request.url.contains("uploadId=u3") {
                return ScriptedResponse::status(409);
            }
            answer(request)
        }));
        let transport: Arc<dyn Transport> = scripted.clone();
        let mime = MimeTable::new();

        let report = MultipartTransfer::new(&transport, &config, &mime)
            .upload(&path("/big.bin"), &HeaderTable::new(), file_of(12 * MIB))
            .await
            .unwrap();
        assert_eq!(report.upload_id, "u3");
        assert_eq!(report.abandoned, vec!["u1".to_string(), "u2".to_string()]);
    }

    #[tokio::test]
    async fn test_restart_budget_exhausted_reports_every_session() {
        let config = config(2);
        let initiates = Arc::new(AtomicUsize::new(0));
        let counter = initiates.clone();
        let scripted = Arc::new(ScriptedTransport::new(move |request| {
            if request.method == Method::POST && request.url.ends_with("?uploads") {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                return initiated(&format!("u{n}"));
            }
            if part_number(request) == Some(1) {
                return ScriptedResponse::status(409);
            }
            answer(request)
        }));
        let transport: Arc<dyn Transport> = scripted.clone();
        let mime = MimeTable::new();

        let err = MultipartTransfer::new(&transport, &config, &mime)
            .upload(&path("/big.bin"), &HeaderTable::new(), file_of(12 * MIB))
            .await
            .unwrap_err();
        match err {
            Error::MultipartFailed {
                upload_id,
                abandoned,
                source,
            } => {
                assert_eq!(upload_id, "u3");
                assert_eq!(abandoned, vec!["u1".to_string(), "u2".to_string()]);
                assert!(source.is_session_lost());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(initiates.load(Ordering::SeqCst), 3);
        assert!(completions(&scripted).is_empty());
    }

    #[tokio::test]
    async fn test_part_resubmitted_after_transport_failure() {
        let config = config(5);
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        let scripted = Arc::new(ScriptedTransport::new(move |request| {
            if part_number(request) == Some(2) && counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return ScriptedResponse::transport_failure("connection reset by peer");
            }
            answer(request)
        }));
        let transport: Arc<dyn Transport> = scripted.clone();
        let mime = MimeTable::new();

        let report = MultipartTransfer::new(&transport, &config, &mime)
            .upload(&path("/big.bin"), &HeaderTable::new(), file_of(15 * MIB))
            .await
            .unwrap();

        assert_eq!(report.retried, 1);
        let requests = scripted.requests();
        assert_eq!(requests.iter().filter(|r| part_number(r) == Some(2)).count(), 2);
        assert_eq!(requests.iter().filter(|r| part_number(r) == Some(1)).count(), 1);
        let complete = completions(&scripted);
        assert_eq!(complete.len(), 1);
        assert!(complete[0].body_str().contains("<ETag>\"etag-2\"</ETag>"));
    }

    #[tokio::test]
    async fn test_transport_failures_exhaust_part_budget() {
        let config = config(5);
        let scripted = Arc::new(ScriptedTransport::new(|request| match part_number(request) {
            Some(2) => ScriptedResponse::transport_failure("connection refused"),
            _ => answer(request),
        }));
        let transport: Arc<dyn Transport> = scripted.clone();
        let mime = MimeTable::new();

        let err = MultipartTransfer::new(&transport, &config, &mime)
            .upload(&path("/big.bin"), &HeaderTable::new(), file_of(15 * MIB))
            .await
            .unwrap_err();

        match err {
            Error::MultipartFailed { upload_id, source, .. } => {
                assert_eq!(upload_id, "u1");
                match *source {
                    Error::RetriesExhausted { attempts, last, .. } => {
                        assert_eq!(attempts, 3);
                        assert!(matches!(*last, Error::Transport(_)));
                    }
                    other => panic!("unexpected cause: {other}"),
                }
            }
            other => panic!("unexpected error: {other}"),
        }
        let requests = scripted.requests();
        assert_eq!(requests.iter().filter(|r| part_number(r) == Some(2)).count(), 3);
        assert!(completions(&scripted).is_empty());
    }

    /// Provider whose part ETags are plain MD5s, like a real one, with a
    /// completion that is applied but whose response never arrives. The
    /// retried completion then finds the session gone.
    fn lost_completion(head_etag: Option<String>) -> ScriptedTransport {
        let initiates = AtomicUsize::new(0);
        let completes = AtomicUsize::new(0);
        ScriptedTransport::new(move |request| {
            if request.method == Method::POST && request.url.ends_with("?uploads") {
                let n = initiates.fetch_add(1, Ordering::SeqCst) + 1;
                return initiated(&format!("u{n}"));
            }
            if let Some(n) = part_number(request) {
                return ScriptedResponse::ok().with_header("ETag", &format!("\"{n:032x}\""));
            }
            if request.method == Method::HEAD {
                return match &head_etag {
                    Some(etag) => ScriptedResponse::ok().with_header("ETag", &format!("\"{etag}\"")),
                    None => ScriptedResponse::status(404),
                };
            }
            if request.url.ends_with("?uploadId=u1") {
                return match completes.fetch_add(1, Ordering::SeqCst) {
                    0 => ScriptedResponse::transport_failure("no progress before response headers"),
                    _ => ScriptedResponse::status(404).with_body(
                        "<Error><Code>NoSuchUpload</Code><Message>gone</Message></Error>",
                    ),
                };
            }
            ScriptedResponse::ok().with_body("<CompleteMultipartUploadResult/>")
        })
    }

    fn assembled_etag(parts: u32) -> String {
        let tokens: Vec<String> = (1..=parts).map(|n| format!("{n:032x}")).collect();
        crate::checksum::multipart_etag(&tokens).unwrap()
    }

    #[tokio::test]
    async fn test_completion_applied_before_lost_response_is_kept() {
        let config = config(5);
        let scripted = Arc::new(lost_completion(Some(assembled_etag(3))));
        let transport: Arc<dyn Transport> = scripted.clone();
        let mime = MimeTable::new();

        let report = MultipartTransfer::new(&transport, &config, &mime)
            .upload(&path("/big.bin"), &HeaderTable::new(), file_of(15 * MIB))
            .await
            .unwrap();

        assert_eq!(report.upload_id, "u1");
        assert!(report.abandoned.is_empty());
        let requests = scripted.requests();
        assert_eq!(requests.iter().filter(|r| r.url.ends_with("?uploads")).count(), 1);
        assert_eq!(requests.iter().filter(|r| r.method == Method::HEAD).count(), 1);
        assert_eq!(completions(&scripted).len(), 2);
        assert_eq!(requests.iter().filter(|r| part_number(r).is_some()).count(), 3);
    }

    #[tokio::test]
    async fn test_completion_lost_with_other_object_restarts() {
        let config = config(5);
        let scripted = Arc::new(lost_completion(Some(assembled_etag(2))));
        let transport: Arc<dyn Transport> = scripted.clone();
        let mime = MimeTable::new();

        let report = MultipartTransfer::new(&transport, &config, &mime)
            .upload(&path("/big.bin"), &HeaderTable::new(), file_of(15 * MIB))
            .await
            .unwrap();

        assert_eq!(report.upload_id, "u2");
        assert_eq!(report.abandoned, vec!["u1".to_string()]);
        let requests = scripted.requests();
        assert_eq!(requests.iter().filter(|r| part_number(r).is_some()).count(), 6);
    }
}
