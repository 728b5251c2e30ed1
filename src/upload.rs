//! Upload speed probing

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::info;

use crate::client::Client;
use crate::config::MAX_UPLOAD_TASKS;
use crate::context::ProbeContext;
use crate::error::ProbeError;
use crate::payload::{UploadPayload, FORM_CONTENT_TYPE};
use crate::prober::{
    speed_collect, BytesPerSecond, BytesTransferred, ProbeGroup, ProbeResult, ProbeTask,
};
use crate::server::Server;
use crate::transport::Transport;

impl Server {
    /// Probe upload speed until every planned transfer finishes or `ctx` is done
    ///
    /// Intermediate estimates are offered to `stream` without blocking. The
    /// returned estimate is authoritative; an error is returned only if no
    /// upload succeeded.
    pub async fn probe_upload_speed(
        &self,
        ctx: &ProbeContext,
        client: &Client,
        stream: Option<&mpsc::Sender<BytesPerSecond>>,
    ) -> Result<BytesPerSecond, ProbeError> {
        let config = client.config();
        let ctx = ctx.child();
        // Queued and in-flight uploads stop once the run is over.
        let _cancel_on_return = ctx.drop_guard();

        let tasks = upload_tasks(
            &ctx,
            client.transport(),
            &self.url,
            &config.upload_sizes,
            config.upload_repeats,
        );
        info!(
            "Probing upload speed to {}: {} uploads (sizes: {:?}, repeats: {}, concurrency: {})",
            self,
            tasks.len(),
            config.upload_sizes,
            config.upload_repeats,
            config.upload_concurrency
        );

        let mut group = ProbeGroup::new(ctx, config.upload_concurrency);
        for task in tasks {
            group.add(task);
        }

        speed_collect(group, stream).await
    }
}

/// Build one upload task per (size, repeat) pair
pub fn upload_tasks(
    ctx: &ProbeContext,
    transport: Arc<dyn Transport>,
    url: &str,
    sizes: &[usize],
    repeats: usize,
) -> Vec<ProbeTask> {
    upload_tasks_with(ctx, transport, url, sizes, repeats, UploadPayload::new)
}

fn upload_tasks_with(
    ctx: &ProbeContext,
    transport: Arc<dyn Transport>,
    url: &str,
    sizes: &[usize],
    repeats: usize,
    payload: fn(usize) -> UploadPayload,
) -> Vec<ProbeTask> {
    let capacity = sizes.len().saturating_mul(repeats).min(MAX_UPLOAD_TASKS);
    let mut tasks: Vec<ProbeTask> = Vec::with_capacity(capacity);
    for &size in sizes {
        for _ in 0..repeats {
            let ctx = ctx.clone();
            let transport = Arc::clone(&transport);
            let url = url.to_string();
            tasks.push(Box::new(move || -> BoxFuture<'static, ProbeResult> {
                Box::pin(async move {
                    send_payload(&ctx, transport.as_ref(), &url, payload(size)).await?;
                    Ok(BytesTransferred(size as u64))
                })
            }));
        }
    }
    tasks
}

/// POST one `size`-byte form payload to `url`
pub async fn upload_file(
    ctx: &ProbeContext,
    transport: &dyn Transport,
    url: &str,
    size: usize,
) -> Result<(), ProbeError> {
    send_payload(ctx, transport, url, UploadPayload::new(size)).await
}

async fn send_payload(
    ctx: &ProbeContext,
    transport: &dyn Transport,
    url: &str,
    body: UploadPayload,
) -> Result<(), ProbeError> {
    transport
        .post(ctx, url, FORM_CONTENT_TYPE, body)
        .await
        .map(|_| ())
        .map_err(|source| ProbeError::Upload {
            url: url.to_string(),
            source,
        })
}
