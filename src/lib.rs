use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};

/// containerfs: container-aware views of kernel pseudo-filesystems.
///
/// Processes confined by cgroups read `/proc/cpuinfo`, `/proc/meminfo`,
/// `/proc/stat` and friends expecting values that reflect *their* limits,
/// not the host's. This library synthesizes those files per reader from the
/// reader's cgroup placement, exposes the cgroup tree itself as a scoped
/// filesystem, and installs device-access classifiers on cgroup v2
/// directories.
///
/// The kernel-facing transport (the FUSE session loop) lives out of tree;
/// it drives [`dispatch::Dispatcher`] through the [`dispatch::Transport`]
/// contract. Everything behind the dispatcher — hierarchy discovery,
/// parsing, accounting, rendering — is this crate.
pub mod cgfs;
pub mod cgroup;
pub mod cpuview;
pub mod devices;
pub mod dispatch;
pub mod error;
pub mod fsutil;
pub mod mountinfo;
pub mod opts;
pub mod parsers;
pub mod procview;

use dispatch::{Dispatcher, Transport};
use opts::Opts;

/// Runs the daemon around the given transport.
///
/// Bootstraps the cgroup hierarchy, starts the background sweeps, installs
/// the signal handlers (`SIGUSR1` refreshes the hierarchy snapshot,
/// `SIGTERM` shuts down orderly), and serves operations until the transport
/// exits or termination is requested.
///
/// # Errors
///
/// Returns an error if bootstrap fails (no cgroup mounts at all), if the
/// signal handlers cannot be installed, or if the transport loop fails.
pub async fn run<T>(transport: T) -> Result<(), Box<dyn std::error::Error>>
where
    T: Transport + Send + 'static,
{
    let opts = Opts::from_env();
    let hierarchy = cgroup::SharedHierarchy::bootstrap("/proc")?;
    for controller in hierarchy.snapshot().controllers() {
        log::debug!(
            "controller {} ({:?}) at {}",
            controller.name(),
            controller.version(),
            controller.mountpoint().display()
        );
    }

    let dispatcher = Arc::new(Dispatcher::new(hierarchy, opts.clone()));
    if !dispatcher.devices_supported() {
        log::warn!("device cgroup programs unsupported on this kernel, device policy disabled");
    }

    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(opts.reap_interval);
            loop {
                interval.tick().await;
                let dispatcher = Arc::clone(&dispatcher);
                match tokio::task::spawn_blocking(move || dispatcher.reap_cpu_entries()).await {
                    Ok(removed) if removed > 0 => {
                        log::trace!("cpu accounting sweep removed {removed} entries");
                    }
                    Ok(_) => {}
                    Err(err) => log::error!("cpu accounting sweep panicked: {err}"),
                }
            }
        });
    }

    if opts.loadavg {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                procview::SAMPLE_INTERVAL_SECS,
            ));
            loop {
                interval.tick().await;
                let dispatcher = Arc::clone(&dispatcher);
                if let Err(err) =
                    tokio::task::spawn_blocking(move || dispatcher.sample_loadavg()).await
                {
                    log::error!("loadavg sampler panicked: {err}");
                }
            }
        });
    }

    let mut serve = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::task::spawn_blocking(move || transport.serve(dispatcher))
    };

    loop {
        tokio::select! {
            _ = sigusr1.recv() => {
                let dispatcher = Arc::clone(&dispatcher);
                if let Err(err) = tokio::task::spawn_blocking(move || dispatcher.refresh()).await {
                    log::error!("hierarchy refresh panicked: {err}");
                }
            }
            _ = sigterm.recv() => {
                dispatcher.shutdown();
                return Ok(());
            }
            result = &mut serve => {
                dispatcher.shutdown();
                result??;
                return Ok(());
            }
        }
    }
}
