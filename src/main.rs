//! Scriba CLI entry point

use anyhow::Context;
use scriba::config::{cli::Cli, validate, Config};
use scriba::coordinator;
use scriba::util::humanize_size;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn main() -> scriba::Result<()> {
    let cli = Cli::parse_args();
    let config = cli.into_config()?;
    validate(&config).context("configuration validation failed")?;

    print_configuration(&config);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            eprintln!("interrupt received; stopping after in-flight operations");
            stop.store(true, Ordering::Relaxed);
        })
        .context("unable to install interrupt handler")?;
    }
    install_dump_handler();

    coordinator::run(&config, stop)?;
    Ok(())
}

fn print_configuration(config: &Config) {
    let w = &config.workload;
    println!("scriba v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "{} writer(s), {} reader(s) per path across {} path(s)",
        w.writers,
        w.readers,
        config.paths.len()
    );
    println!(
        "{} blocks over {} files, {} pattern{}",
        humanize_size(w.block_size as f64, true),
        humanize_size(w.file_size as f64, true),
        w.pattern,
        if w.direct { ", direct I/O" } else { "" }
    );
}

/// SIGUSR1 prints each worker's cumulative bytes without stopping the run.
#[cfg(unix)]
fn install_dump_handler() {
    extern "C" fn on_usr1(_: libc::c_int) {
        coordinator::DUMP_REQUESTED.store(true, Ordering::Relaxed);
    }
    let handler = on_usr1 as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGUSR1, handler as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
fn install_dump_handler() {}
