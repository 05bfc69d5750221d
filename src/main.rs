use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;

use hoptrace::cli::Args;
use hoptrace::prefs::Prefs;
use hoptrace::probe::check_permissions;
use hoptrace::{Config, IcmpProbe, IpInfoLookup, TraceEngine};

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout carries only hop lines
    env_logger::Builder::from_env(Env::default().default_filter_or(args.log_level())).init();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let Some(ref target) = args.target else {
        println!(
            "Please, use '{} <domain or ip-address>'",
            env!("CARGO_PKG_NAME")
        );
        return Ok(());
    };

    // Check permissions early
    if let Err(e) = check_permissions() {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let prefs = Prefs::load();
    let config =
        Config::from(&args).with_prefs(&args, &prefs, std::env::var("IPINFO_TOKEN").ok());
    log::debug!(
        "max_ttl={} timeout={:?} payload={}B lookup={}",
        config.max_ttl,
        config.timeout,
        config.payload_size,
        config.lookup_base_url
    );

    let probe = IcmpProbe::new().context("Failed to open ICMP sockets")?;
    let lookup = IpInfoLookup::from_config(&config).context("Failed to create lookup client")?;
    let mut engine = TraceEngine::new(probe, lookup, &config);

    for hop in engine.trace(target) {
        let hop = hop.with_context(|| format!("Trace to {} aborted", target))?;
        println!("{}", hop);
    }

    Ok(())
}
