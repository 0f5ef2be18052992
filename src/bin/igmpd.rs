
use igmpd::addr::{ALL_SYSTEMS, ALL_V3_ROUTERS};
use igmpd::config::{Config, ConfigManager};
use igmpd::handler::{IgmpInputHandler, Inbound, Verdict};
use igmpd::igmp::{AsyncIgmpSocket, RawIgmpSocket};
use igmpd::interface::Interface;
use igmpd::report::ReportBuilder;

use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use rand::Rng;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;


fn main() {
    env_logger::init();
    let args = Cli::parse();

    match args.subcmd {
        Command::Check => {
            if let Err(e) = check(&args.config) {
                log::error!("{}", e);
                std::process::exit(1);
            }
            return;
        }

        Command::Start => {}
    }

    let config_manager = ConfigManager::new(&args.config);
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async move {
        if let Err(e) = config_manager.load().await {
            log::warn!("Failed to load configuration: {:?}", e);
        }

        let config = config_manager.clone();
        tokio::spawn(async move {
            while !config_manager.is_loaded() {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let _ = config_manager.load().await;
            }

            log::info!("Configuration loaded");
        });

        let config_reloader = config.clone();
        tokio::spawn(async move {
            let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()).unwrap();
            loop {
                signal.recv().await;
                log::info!("Received SIGHUP, reloading configuration");
                if let Err(e) = config_reloader.load().await {
                    log::warn!("Failed to reload configuration: {:?}", e);
                }
            }
        });

        if let Err(e) = start(config).await {
            log::error!("Daemon stopped: {:?}", e);
            std::process::exit(1);
        }
    });
}

/// Validates the configuration and prints the reports it would produce.
fn check(path: &Path) -> Result<(), std::io::Error> {
    let config = Config::from_file(path)?;
    let mut handler = new_handler(&config);
    let filters = config.filters()?;
    let reports = handler.reconcile(&filters).map_err(std::io::Error::other)?;

    println!("{}: {} group(s) on {}", path.display(), filters.len(), config.global.interface);
    for report in reports {
        let hex: Vec<String> = report.iter().map(|b| format!("{:02x}", b)).collect();
        println!("{}", hex.join(" "));
    }
    Ok(())
}

fn new_handler(config: &Config) -> IgmpInputHandler {
    IgmpInputHandler::new(ReportBuilder::new(config.global.max_report_size), config.global.report_style)
}

/// Group-specific queries go to the group address. Joining those groups on
/// the socket would make the kernel report them too, so the link accepts all
/// multicast instead and the socket takes IGMP for any group. The kernel
/// delivers IGMP to unjoined groups locally.
fn open_socket(interface: &Interface) -> Result<AsyncIgmpSocket, std::io::Error> {
    if !igmpd::interface::set_allmulti(&interface.if_name, true)? {
        log::info!("Enabled all-multicast reception on {}", interface.if_name);
    }

    let raw_socket = RawIgmpSocket::new()?;
    raw_socket.bind_device(&interface.if_name)?;
    raw_socket.set_multicast_if(interface.if_id)?;
    raw_socket.set_multicast_ttl(1)?;
    raw_socket.set_multicast_loop(false)?;
    raw_socket.set_multicast_all(true)?;
    raw_socket.set_router_alert()?;
    raw_socket.join_multicast(ALL_SYSTEMS.addr(), interface.if_id)?;
    raw_socket.into_async()
}

/// Sends an unsolicited report `robustness` times, spaced by `interval`.
fn send_unsolicited(socket: &AsyncIgmpSocket, reports: Vec<Vec<u8>>, robustness: u8, interval: Duration) {
    if reports.is_empty() {
        return;
    }

    let socket = socket.clone();
    tokio::spawn(async move {
        for i in 0..robustness {
            if i > 0 {
                tokio::time::sleep(interval).await;
            }
            for report in reports.iter() {
                if let Err(e) = socket.send(ALL_V3_ROUTERS.addr(), report).await {
                    log::error!("Failed to send report: {:?}", e);
                }
            }
        }
    });
}

/// Answers a query after a random delay within its Max Resp Time.
fn send_response(socket: &AsyncIgmpSocket, reports: Vec<Vec<u8>>, max_resp_time: u32) {
    let delay = Duration::from_millis(rand::thread_rng().gen_range(0..=max_resp_time as u64) * 100);
    let socket = socket.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        for report in reports.iter() {
            if let Err(e) = socket.send(ALL_V3_ROUTERS.addr(), report).await {
                log::error!("Failed to send query response: {:?}", e);
            }
        }
    });
}

fn apply_config(handler: &Mutex<IgmpInputHandler>, socket: &AsyncIgmpSocket, config: &Config) {
    let filters = match config.filters() {
        Ok(filters) => filters,
        Err(e) => {
            log::error!("Invalid group configuration: {:?}", e);
            return;
        }
    };

    let reports = handler.lock().reconcile(&filters);
    match reports {
        Ok(reports) => {
            log::debug!("{} report(s) after applying configuration", reports.len());
            let interval = Duration::from_millis(config.global.unsolicited_report_interval_ms);
            send_unsolicited(socket, reports, config.global.robustness, interval);
        }
        Err(e) => {
            log::error!("Failed to build reports: {}", e);
        }
    }
}

async fn start(config: ConfigManager) -> Result<(), std::io::Error> {
    let mut changes = config.subscribe();
    if !config.is_loaded() {
        log::warn!("Configuration not loaded, waiting til configured");
        let _ = changes.recv().await;
    }

    let config_data = config.get().ok_or_else(|| std::io::Error::other("configuration not loaded"))?;
    log::debug!("Configuration: {:?}", config_data);

    let interface = Interface::by_name(&config_data.global.interface)?;
    log::info!("Running IGMPv3 on {} (index {})", interface.if_name, interface.if_id);

    let socket = open_socket(&interface)?;
    let handler = Arc::new(Mutex::new(new_handler(&config_data)));
    apply_config(&handler, &socket, &config_data);

    {
        let handler = handler.clone();
        let socket = socket.clone();
        let config = config.clone();
        let if_name = interface.if_name.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(()) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
                let config_data = match config.get() {
                    Some(config_data) => config_data,
                    None => continue,
                };
                if config_data.global.interface != if_name {
                    log::warn!("Interface change to {} requires a restart", config_data.global.interface);
                }
                apply_config(&handler, &socket, &config_data);
            }
        });
    }

    let mut buf = vec![0u8; 65536];
    loop {
        let len = socket.recv(&mut buf).await?;
        let Inbound { verdict, response } = handler.lock().handle_inbound(&buf[..len]);
        match verdict {
            Verdict::Dropped(e) => {
                log::debug!("Dropped datagram: {}", e);
            }
            Verdict::FilteredOut => {
                log::trace!("Filtered out datagram of {} bytes", len);
            }
            Verdict::ForHost | Verdict::PassThrough => {}
        }

        if let Some(response) = response {
            log::debug!("Answering query with {} report(s) within {} ds", response.reports.len(), response.max_resp_time);
            send_response(&socket, response.reports, response.max_resp_time);
        }
    }
}


/// IGMPv3 host daemon
#[derive(Debug, Clone, Parser)]
#[clap(name = "igmpd", version, about)]
pub struct Cli {
    /// Path to the configuration file
    #[clap(short, long, default_value = "/etc/igmpd.toml")]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub subcmd: Command,
}

#[derive(Debug, Clone, Subcommand)]
#[non_exhaustive]
pub enum Command {
    /// start the daemon
    Start,

    /// validate the configuration and print the reports it produces
    Check,
}
