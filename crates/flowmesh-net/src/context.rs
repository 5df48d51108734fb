//! Host and worker contexts, plus the local job launcher.
//!
//! A [`HostContext`] bundles what one host shares: configuration, block
//! pool, and the multiplexer. A [`WorkerContext`] is one worker's handle
//! onto that host state plus its own rank and stats; user job code receives
//! one and works purely through it.
//!
//! [`run_local`] is the harness used by tests and single-machine runs: it
//! builds an in-process mesh, one multiplexer per host, and one blocking
//! worker thread per worker, then tears everything down collectively.

use std::sync::Arc;

use tracing::debug;

use flowmesh_core::{BlockPool, EngineConfig, Error, Result, WorkerStats};
use flowmesh_data::{BlockFile, BlockWriter};

use crate::channel::Channel;
use crate::flow::FlowControl;
use crate::group::Group;
use crate::multiplexer::Multiplexer;

/// Shared per-host engine state.
pub struct HostContext {
    config: EngineConfig,
    pool: BlockPool,
    multiplexer: Multiplexer,
}

impl HostContext {
    /// Wrap a connected group. The group's shape must match the config.
    pub fn new(config: EngineConfig, group: Group) -> Result<Arc<Self>> {
        config.validate()?;
        if group.num_hosts() != config.num_hosts {
            return Err(Error::InvalidArgument(format!(
                "group spans {} hosts but config says {}",
                group.num_hosts(),
                config.num_hosts
            )));
        }

        let pool = BlockPool::new();
        let multiplexer = Multiplexer::new(
            group,
            pool.clone(),
            config.workers_per_host,
            config.default_block_size,
        );
        Ok(Arc::new(Self {
            config,
            pool,
            multiplexer,
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &BlockPool {
        &self.pool
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.multiplexer
    }

    pub fn host_rank(&self) -> usize {
        self.multiplexer.host_rank()
    }

    /// The context of local worker `local_worker`.
    pub fn worker(self: &Arc<Self>, local_worker: usize) -> WorkerContext {
        assert!(
            local_worker < self.config.workers_per_host,
            "local worker {local_worker} outside host with {} workers",
            self.config.workers_per_host
        );
        WorkerContext {
            host: Arc::clone(self),
            local_worker,
            stats: Arc::new(WorkerStats::new()),
        }
    }

    pub async fn shutdown(&self) {
        self.multiplexer.shutdown().await;
    }
}

/// One worker's handle on the engine.
#[derive(Clone)]
pub struct WorkerContext {
    host: Arc<HostContext>,
    local_worker: usize,
    stats: Arc<WorkerStats>,
}

impl WorkerContext {
    pub fn host(&self) -> &HostContext {
        &self.host
    }

    pub fn config(&self) -> &EngineConfig {
        self.host.config()
    }

    pub fn pool(&self) -> &BlockPool {
        self.host.pool()
    }

    pub fn local_worker(&self) -> usize {
        self.local_worker
    }

    pub fn host_rank(&self) -> usize {
        self.host.host_rank()
    }

    pub fn workers_per_host(&self) -> usize {
        self.host.config().workers_per_host
    }

    pub fn num_workers(&self) -> usize {
        self.host.config().num_workers()
    }

    /// Rank of this worker across all hosts.
    pub fn global_rank(&self) -> usize {
        self.host_rank() * self.workers_per_host() + self.local_worker
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// A fresh in-memory block file.
    pub fn new_file(&self) -> BlockFile {
        BlockFile::new()
    }

    /// A writer into `file` with the configured block size.
    pub fn file_writer(&self, file: &BlockFile) -> Result<BlockWriter<BlockFile>> {
        file.writer(self.pool().clone(), self.config().default_block_size)
    }

    /// Allocate the next channel id for this worker and materialize the
    /// channel. Workers must allocate in lockstep across hosts.
    pub fn allocate_channel(&self) -> Arc<Channel> {
        let multiplexer = self.host.multiplexer();
        let id = multiplexer.allocate_channel_id(self.local_worker);
        self.stats.add_channel_opened();
        multiplexer.get_or_create_channel(id, self.local_worker)
    }

    /// Collective operations for this worker.
    pub fn flow(&self) -> FlowControl<'_> {
        FlowControl::new(self)
    }
}

/// Run `job` on `num_hosts × workers_per_host` workers over an in-process
/// mesh. Returns the first worker error, if any; worker panics propagate.
pub fn run_local<F>(num_hosts: usize, workers_per_host: usize, job: F) -> Result<()>
where
    F: Fn(WorkerContext) -> Result<()> + Send + Sync + 'static,
{
    let config = EngineConfig {
        num_hosts,
        workers_per_host,
        ..EngineConfig::default()
    };
    run_local_with(config, job)
}

/// [`run_local`] with an explicit configuration.
pub fn run_local_with<F>(config: EngineConfig, job: F) -> Result<()>
where
    F: Fn(WorkerContext) -> Result<()> + Send + Sync + 'static,
{
    config.validate()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let job = Arc::new(job);
        let groups = Group::local_mesh(config.num_hosts);

        let mut hosts = Vec::with_capacity(config.num_hosts);
        let mut workers = Vec::with_capacity(config.num_workers());
        for group in groups {
            let host = HostContext::new(config.clone(), group)?;
            for local_worker in 0..config.workers_per_host {
                let ctx = host.worker(local_worker);
                let job = Arc::clone(&job);
                workers.push(tokio::task::spawn_blocking(move || job(ctx)));
            }
            hosts.push(host);
        }

        let mut first_error = None;
        for worker in workers {
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        std::panic::resume_unwind(join_error.into_panic());
                    }
                }
            }
        }

        // hosts must stop together: each recv task ends only when its peer
        // shuts the matching send side down
        futures::future::join_all(hosts.iter().map(|host| host.shutdown())).await;
        debug!("local run finished");

        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    })
}
