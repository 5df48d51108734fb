//! Multi-worker exchange scenarios over the in-process mesh.

use std::collections::BTreeMap;
use std::sync::Arc;

use flowmesh_core::{BlockPool, EngineConfig, Result};
use flowmesh_net::{run_local, run_local_with, Group, HostContext};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

#[test]
fn channel_ids_allocate_in_lockstep() {
    init_tracing();
    run_local(2, 2, |ctx| {
        let first = ctx.allocate_channel();
        let second = ctx.allocate_channel();
        assert_eq!(first.id(), 0);
        assert_eq!(second.id(), 1);
        first.close()?;
        second.close()?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn all_to_all_exchange_delivers_everything() {
    init_tracing();
    const ITEMS_PER_PEER: u64 = 1000;

    run_local(2, 2, move |ctx| {
        let rank = ctx.global_rank() as u64;
        let channel = ctx.allocate_channel();

        // send (sender, destination, i) triples to every worker
        let mut writers = channel.open_writers_with(512)?;
        for (dest, writer) in writers.iter_mut().enumerate() {
            for i in 0..ITEMS_PER_PEER {
                writer.put_item(&(rank, dest as u64, i))?;
            }
            writer.close()?;
        }

        // per-source readers arrive in source rank order
        let mut readers = channel.open_readers();
        for (source, reader) in readers.iter_mut().enumerate() {
            let items = reader.read_remaining::<(u64, u64, u64)>()?;
            assert_eq!(items.len(), ITEMS_PER_PEER as usize);
            for (position, (sender, dest, i)) in items.iter().enumerate() {
                assert_eq!(*sender, source as u64);
                assert_eq!(*dest, rank);
                // within one (channel, source, dest) stream, order holds
                assert_eq!(*i, position as u64);
            }
        }

        channel.close()?;
        assert!(channel.is_closed());
        Ok(())
    })
    .unwrap();
}

#[test]
fn concat_reader_presents_sources_in_rank_order() {
    init_tracing();
    run_local(1, 3, |ctx| {
        let rank = ctx.global_rank() as u64;
        let channel = ctx.allocate_channel();

        let mut writers = channel.open_writers_with(256)?;
        for writer in writers.iter_mut() {
            for i in 0..50u64 {
                writer.put_item(&(rank * 1000 + i))?;
            }
            writer.close()?;
        }

        let mut reader = channel.open_concat_reader();
        let items = reader.read_remaining::<u64>()?;
        assert_eq!(items.len(), 150);
        // blocks drain source 0 fully, then 1, then 2
        let expected: Vec<u64> = (0..3)
            .flat_map(|source| (0..50).map(move |i| source * 1000 + i))
            .collect();
        assert_eq!(items, expected);

        channel.close()?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn caching_reader_can_replay_the_stream() {
    init_tracing();
    run_local(2, 1, |ctx| {
        let rank = ctx.global_rank() as u64;
        let channel = ctx.allocate_channel();

        let mut writers = channel.open_writers_with(128)?;
        for writer in writers.iter_mut() {
            for i in 0..20u64 {
                writer.put_item(&(rank, i))?;
            }
            writer.close()?;
        }

        let mut first = channel.open_caching_reader();
        let once = first.read_remaining::<(u64, u64)>()?;
        assert_eq!(once.len(), 40);

        let mut second = channel.open_caching_reader();
        let twice = second.read_remaining::<(u64, u64)>()?;
        assert_eq!(once, twice);

        channel.close()?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn scatter_moves_thirds_between_three_workers() {
    init_tracing();
    const PER_SOURCE: usize = 300;

    run_local(1, 3, |ctx| {
        let rank = ctx.global_rank();

        // workers 0 and 1 each hold half the data; worker 2 starts empty
        let file = ctx.new_file();
        let mut writer = ctx.file_writer(&file)?;
        if rank < 2 {
            let base = (rank * PER_SOURCE) as u64;
            for i in 0..PER_SOURCE as u64 {
                writer.put_item(&(base + i))?;
            }
        }
        writer.close()?;

        // worker 0 keeps 2/3 of its items and passes 1/3 to worker 1;
        // worker 1 keeps its first third and passes 2/3 to worker 2
        let offsets: Vec<usize> = match rank {
            0 => vec![200, 300, 300],
            1 => vec![0, 100, 300],
            _ => vec![0, 0, 0],
        };

        let channel = ctx.allocate_channel();
        channel.scatter::<u64>(&file, &offsets)?;

        let mut reader = channel.open_concat_reader();
        let mut received = reader.read_remaining::<u64>()?;
        received.sort_unstable();

        let expected: Vec<u64> = match rank {
            0 => (0..200).collect(),
            1 => (200..400).collect(),
            _ => (400..600).collect(),
        };
        assert_eq!(received, expected);

        channel.close()?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn prefix_sum_over_ranks() {
    init_tracing();
    run_local(2, 3, |ctx| {
        let rank = ctx.global_rank() as u64;
        let flow = ctx.flow();

        let inclusive = flow.prefix_sum(rank, 0u64, |a, b| a + b, true)?;
        assert_eq!(inclusive, rank * (rank + 1) / 2);

        let exclusive = flow.prefix_sum(rank, 0u64, |a, b| a + b, false)?;
        assert_eq!(exclusive, rank.saturating_sub(1) * rank / 2);

        Ok(())
    })
    .unwrap();
}

#[test]
fn all_reduce_broadcast_and_barrier() {
    init_tracing();
    run_local(2, 2, |ctx| {
        let rank = ctx.global_rank() as u64;
        let flow = ctx.flow();

        let sum = flow.all_reduce(rank + 1, |a, b| a + b)?;
        assert_eq!(sum, 1 + 2 + 3 + 4);

        let max = flow.all_reduce(rank, |a, b| a.max(b))?;
        assert_eq!(max, 3);

        let word = flow.broadcast(format!("from-root-{}", ctx.global_rank()))?;
        assert_eq!(word, "from-root-0");

        let rooted = flow.reduce_to_root(rank, |a, b| a + b)?;
        if ctx.global_rank() == 0 {
            assert_eq!(rooted, Some(6));
        } else {
            assert_eq!(rooted, None);
        }

        flow.barrier()?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn blocks_may_arrive_before_the_receiver_opens_the_channel() {
    init_tracing();
    run_local(2, 1, |ctx| {
        let rank = ctx.global_rank();
        if rank == 0 {
            // sender side: push immediately and close
            let channel = ctx.allocate_channel();
            let mut writers = channel.open_writers_with(256)?;
            for writer in writers.iter_mut().skip(1) {
                writer.put_item(&42u64)?;
                writer.close()?;
            }
            writers[0].close()?;
            channel.close()?;
        } else {
            // receiver side: dawdle, then look the channel up
            std::thread::sleep(std::time::Duration::from_millis(50));
            let channel = ctx.allocate_channel();
            let mut writers = channel.open_writers_with(256)?;
            for writer in writers.iter_mut() {
                writer.close()?;
            }
            let mut readers = channel.open_readers();
            assert_eq!(readers[0].next::<u64>()?, 42);
            channel.close()?;
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn worker_errors_propagate_to_the_caller() {
    init_tracing();
    let result = run_local(1, 2, |ctx| {
        if ctx.global_rank() == 1 {
            return Err(flowmesh_core::Error::InvalidArgument("boom".into()));
        }
        Ok(())
    });
    assert!(result.is_err());
}

#[test]
fn custom_config_block_size_applies() {
    init_tracing();
    let config = EngineConfig {
        num_hosts: 1,
        workers_per_host: 2,
        default_block_size: 128,
        ..EngineConfig::default()
    };
    run_local_with(config, |ctx| {
        assert_eq!(ctx.config().default_block_size, 128);
        let channel = ctx.allocate_channel();
        let mut writers = channel.open_writers()?;
        for writer in writers.iter_mut() {
            for i in 0..100u64 {
                writer.put_item(&i)?;
            }
            writer.close()?;
        }
        let mut reader = channel.open_concat_reader();
        assert_eq!(reader.read_remaining::<u64>()?.len(), 200);
        channel.close()?;
        Ok(())
    })
    .unwrap();
}

async fn free_local_addrs(n: usize) -> Vec<std::net::SocketAddr> {
    // bind ephemeral listeners to reserve distinct ports, then free them
    let mut addrs = Vec::with_capacity(n);
    let mut listeners = Vec::with_capacity(n);
    for _ in 0..n {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        addrs.push(listener.local_addr().unwrap());
        listeners.push(listener);
    }
    drop(listeners);
    addrs
}

#[tokio::test(flavor = "multi_thread")]
async fn tcp_mesh_carries_a_channel() -> anyhow::Result<()> {
    init_tracing();
    let addrs = free_local_addrs(2).await;

    let (group0, group1) = tokio::try_join!(
        Group::tcp_mesh(0, &addrs),
        Group::tcp_mesh(1, &addrs)
    )?;

    let config = EngineConfig {
        num_hosts: 2,
        workers_per_host: 1,
        default_block_size: 1024,
        ..EngineConfig::default()
    };
    let host0 = HostContext::new(config.clone(), group0)?;
    let host1 = HostContext::new(config, group1)?;

    let jobs = [host0.worker(0), host1.worker(0)].map(|ctx| {
        tokio::task::spawn_blocking(move || -> Result<()> {
            let rank = ctx.global_rank() as u64;
            let channel = ctx.allocate_channel();
            let mut writers = channel.open_writers()?;
            for writer in writers.iter_mut() {
                for i in 0..500u64 {
                    writer.put_item(&(rank, i))?;
                }
                writer.close()?;
            }
            let mut reader = channel.open_concat_reader();
            let items = reader.read_remaining::<(u64, u64)>()?;
            assert_eq!(items.len(), 1000);
            channel.close()?;
            Ok(())
        })
    });

    for job in jobs {
        job.await??;
    }
    tokio::join!(host0.shutdown(), host1.shutdown());
    Ok(())
}

#[test]
fn pool_returns_to_zero_after_run() {
    init_tracing();
    let pools: Arc<std::sync::Mutex<Vec<BlockPool>>> = Arc::default();
    let pools_in_job = Arc::clone(&pools);

    run_local(1, 2, move |ctx| {
        pools_in_job.lock().unwrap().push(ctx.pool().clone());
        let channel = ctx.allocate_channel();
        let mut writers = channel.open_writers_with(256)?;
        for writer in writers.iter_mut() {
            for i in 0..100u64 {
                writer.put_item(&i)?;
            }
            writer.close()?;
        }
        let mut reader = channel.open_concat_reader();
        reader.read_remaining::<u64>()?;
        channel.close()?;
        Ok(())
    })
    .unwrap();

    for pool in pools.lock().unwrap().iter() {
        assert_eq!(pool.total_bytes(), 0);
    }
}

#[test]
fn multiplexer_stats_count_remote_blocks() {
    init_tracing();
    let counts: Arc<std::sync::Mutex<BTreeMap<usize, u64>>> = Arc::default();
    let counts_in_job = Arc::clone(&counts);

    run_local(2, 1, move |ctx| {
        let channel = ctx.allocate_channel();
        let mut writers = channel.open_writers_with(256)?;
        for writer in writers.iter_mut() {
            for i in 0..200u64 {
                writer.put_item(&i)?;
            }
            writer.close()?;
        }
        let mut reader = channel.open_concat_reader();
        reader.read_remaining::<u64>()?;
        channel.close()?;

        let received = ctx.host().multiplexer().stats().snapshot().blocks_received;
        counts_in_job.lock().unwrap().insert(ctx.global_rank(), received);
        Ok(())
    })
    .unwrap();

    for (_, blocks) in counts.lock().unwrap().iter() {
        assert!(*blocks > 0, "remote blocks should be counted");
    }
}
