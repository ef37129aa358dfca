//! S3 client implementation
//!
//! Implements the ObjectStore trait from bfs-core on top of signed
//! exchanges. Single-object operations run one exchange with its own retry
//! loop; batched HEADs and multipart transfers go through the scheduler.

use std::sync::Arc;

use async_trait::async_trait;

use bfs_core::{
    Descriptor, Error, HeadEntry, HeadTarget, HeaderTable, ListOptions, ListResult, MimeTable,
    MultipartReport, MultipartUploadInfo, ObjectInfo, ObjectPath, ObjectStore, Result, TransportConfig,
};

use crate::context::RequestContext;
use crate::multipart;
use crate::scheduler::{Disposition, Scheduler};
use crate::transport::{HttpTransport, Transport};
use crate::upload::MultipartTransfer;
use crate::xml;

/// S3 client bound to one bucket
pub struct S3Client {
    config: Arc<TransportConfig>,
    transport: Arc<dyn Transport>,
    mime: MimeTable,
}

impl S3Client {
    /// Create a client speaking HTTP(S) to the configured endpoint
    pub fn new(config: TransportConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        Self::with_transport(config, transport)
    }

    /// Create a client on top of any transport
    pub fn with_transport(config: TransportConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let mime = MimeTable::load(config.mime_file.as_deref())?;
        tracing::debug!(
            endpoint = %config.endpoint,
            bucket = %config.bucket,
            mime_types = mime.len(),
            "S3 client ready"
        );
        Ok(Self {
            config: Arc::new(config),
            transport,
            mime,
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    async fn execute(&self, mut exchange: RequestContext) -> Result<RequestContext> {
        exchange.execute(self.transport.as_ref()).await?;
        Ok(exchange)
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn check_bucket(&self) -> Result<()> {
        self.execute(RequestContext::check_bucket(&self.config))
            .await
            .map(|_| ())
    }

    async fn head_object(&self, path: &ObjectPath) -> Result<ObjectInfo> {
        let exchange = self
            .execute(RequestContext::head(&self.config, &HeadTarget::new(path.clone())))
            .await?;
        Ok(exchange.object_info())
    }

    /// Entries come back in completion order, one per target.
    async fn head_objects(&self, targets: Vec<HeadTarget>) -> Result<Vec<HeadEntry>> {
        let mut scheduler = Scheduler::new(
            self.transport.clone(),
            self.config.max_parallel_upload,
            self.config.retry.clone(),
        );
        for target in &targets {
            scheduler.submit(RequestContext::head(&self.config, target));
        }

        let mut entries = Vec::with_capacity(targets.len());
        let mut handler = |exchange: RequestContext, outcome: Result<()>| {
            let result = match outcome {
                Ok(()) => Ok(exchange.object_info()),
                Err(e) if e.is_retryable() => return Disposition::RetryWith(exchange.replacement()),
                Err(e) => Err(e),
            };
            let target = HeadTarget {
                path: exchange.path().clone(),
                base_path: exchange.base_path().map(str::to_string),
                saved_path: exchange.saved_path().map(str::to_string),
            };
            entries.push(HeadEntry { target, result });
            Disposition::Accept
        };
        scheduler.run(&mut handler).await?;

        tracing::debug!(count = entries.len(), "Batched HEAD finished");
        Ok(entries)
    }

    async fn get_object(
        &self,
        path: &ObjectPath,
        file: Descriptor,
        file_offset: u64,
        range: Option<(u64, u64)>,
    ) -> Result<u64> {
        let exchange = self
            .execute(RequestContext::get(&self.config, path, file, file_offset, range))
            .await?;
        Ok(exchange.bytes_written())
    }

    async fn put_object(&self, path: &ObjectPath, meta: &HeaderTable, file: Descriptor) -> Result<()> {
        let size = file.metadata()?.len();
        let exchange = RequestContext::put(&self.config, &self.mime, path, meta, file, size)?;
        self.execute(exchange).await?;
        tracing::debug!(path = %path, size, "Object stored");
        Ok(())
    }

    async fn put_object_metadata(&self, path: &ObjectPath, meta: &HeaderTable) -> Result<()> {
        self.execute(RequestContext::put_head(&self.config, &self.mime, path, meta))
            .await
            .map(|_| ())
    }

    async fn copy_object(&self, from: &ObjectPath, to: &ObjectPath, meta: &HeaderTable) -> Result<()> {
        self.execute(RequestContext::copy(&self.config, &self.mime, from, to, meta))
            .await
            .map(|_| ())
    }

    async fn delete_object(&self, path: &ObjectPath) -> Result<()> {
        self.execute(RequestContext::delete(&self.config, path))
            .await
            .map(|_| ())
    }

    async fn list_bucket(&self, options: &ListOptions) -> Result<ListResult> {
        let exchange = self.execute(RequestContext::list(&self.config, options)).await?;
        xml::parse_list_bucket(&exchange.body_data().to_str_lossy())
    }

    async fn list_multipart_uploads(&self) -> Result<Vec<MultipartUploadInfo>> {
        let exchange = self
            .execute(RequestContext::list_multipart(&self.config))
            .await?;
        xml::parse_multipart_uploads(&exchange.body_data().to_str_lossy())
    }

    async fn multipart_upload(
        &self,
        path: &ObjectPath,
        meta: &HeaderTable,
        file: Descriptor,
    ) -> Result<MultipartReport> {
        MultipartTransfer::new(&self.transport, &self.config, &self.mime)
            .upload(path, meta, file)
            .await
    }

    async fn multipart_rename(
        &self,
        from: &ObjectPath,
        to: &ObjectPath,
        meta: &HeaderTable,
        size: u64,
    ) -> Result<MultipartReport> {
        MultipartTransfer::new(&self.transport, &self.config, &self.mime)
            .rename(from, to, meta, size)
            .await
    }

    async fn abort_multipart(&self, path: &ObjectPath, upload_id: &str) -> Result<()> {
        if upload_id.is_empty() {
            return Err(Error::General("empty upload id".into()));
        }
        multipart::abort(self.transport.as_ref(), &self.config, path, upload_id).await
    }
}
