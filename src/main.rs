mod analyzer;
mod capture;
mod crypto;
mod output;
mod protocol;
mod reassembly;
mod stream;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use analyzer::Analyzer;
use capture::PacketSource;
use output::Formatter;

#[derive(Parser)]
#[command(
    name = "maplesniff",
    version,
    about = "Passive sniffer and decryptor for the Maple game protocol"
)]
struct Cli {
    /// Network interface to capture on
    #[arg(short = 'd', long)]
    interface: Option<String>,

    /// Read from pcap file instead of live capture
    #[arg(short = 'I', long)]
    input: Option<PathBuf>,

    /// BPF filter expression (same syntax as tcpdump)
    #[arg(short = 'F', long)]
    bpf: Option<String>,

    /// Output records as JSON lines
    #[arg(long)]
    json: bool,

    /// Show hex dumps of decrypted payloads
    #[arg(short = 'x', long)]
    hex: bool,

    /// Quiet mode (hex dumps only, no record headers)
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Stop after N emitted records
    #[arg(short = 'n', long)]
    count: Option<usize>,

    /// Don't use promiscuous mode
    #[arg(short = 'p', long)]
    no_promisc: bool,

    /// Snap length (bytes to capture per packet)
    #[arg(short = 's', long, default_value_t = 65535, value_parser = clap::value_parser!(i32).range(68..=65535))]
    snaplen: i32,

    /// Print a per-session summary when capture ends
    #[arg(long)]
    sessions: bool,

    /// List available interfaces and exit
    #[arg(short = 'L', long)]
    list_interfaces: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_interfaces {
        for (name, desc, addrs) in capture::list_interfaces()? {
            println!("{:<16} {}  [{}]", name, desc, addrs.join(", "));
        }
        return Ok(());
    }

    let mut source = if let Some(ref path) = cli.input {
        PacketSource::from_file(path, cli.bpf.as_deref())?
    } else {
        PacketSource::live(
            cli.interface.as_deref(),
            cli.snaplen,
            !cli.no_promisc,
            cli.bpf.as_deref(),
        )?
    };

    // Install Ctrl+C handler for graceful shutdown
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_clone = stop_flag.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if stop_clone.load(Ordering::Relaxed) {
            // Second Ctrl+C — force exit
            std::process::exit(1);
        }
        stop_clone.store(true, Ordering::Relaxed);
    }) {
        eprintln!("Warning: failed to install Ctrl+C handler: {}", e);
    }

    let formatter = Formatter::new(cli.json, cli.hex, cli.quiet);
    let mut maple = Analyzer::new();
    let mut record_count: usize = 0;

    source.for_each_packet(|packet| {
        if stop_flag.load(Ordering::Relaxed) {
            return false;
        }

        for record in maple.on_frame(packet.data, packet.timestamp) {
            formatter.print_record(&record);
            record_count += 1;
        }

        match cli.count {
            Some(n) => record_count < n,
            None => true,
        }
    })?;

    if cli.sessions {
        formatter.print_sessions(&maple.sessions());
    }

    Ok(())
}
