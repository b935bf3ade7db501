use anyhow::{Context, Result};
use pcap::{Capture, Device};
use std::path::Path;

/// One captured frame: raw link-layer bytes and the capture timestamp in
/// seconds since the epoch.
pub struct PacketData<'a> {
    pub data: &'a [u8],
    pub timestamp: f64,
}

pub enum PacketSource {
    Live(Capture<pcap::Active>),
    File(Capture<pcap::Offline>),
}

impl PacketSource {
    pub fn live(
        interface: Option<&str>,
        snaplen: i32,
        promisc: bool,
        bpf: Option<&str>,
    ) -> Result<Self> {
        let device = match interface {
            Some(name) => Device::list()?
                .into_iter()
                .find(|d| d.name == name)
                .context(format!("Interface '{}' not found", name))?,
            None => Device::lookup()?.context("No capture device found")?,
        };

        let mut cap = Capture::from_device(device)?
            .snaplen(snaplen)
            .promisc(promisc)
            .timeout(1000)
            .open()
            .context("Failed to open capture device")?;

        if let Some(filter) = bpf {
            cap.filter(filter, true)
                .context(format!("Invalid BPF filter: {}", filter))?;
        }

        warn_on_unsupported_link_type(cap.get_datalink());
        Ok(PacketSource::Live(cap))
    }

    pub fn from_file(path: &Path, bpf: Option<&str>) -> Result<Self> {
        let mut cap = Capture::from_file(path)
            .context(format!("Failed to open pcap file: {}", path.display()))?;

        if let Some(filter) = bpf {
            cap.filter(filter, true)
                .context(format!("Invalid BPF filter: {}", filter))?;
        }

        warn_on_unsupported_link_type(cap.get_datalink());
        Ok(PacketSource::File(cap))
    }

    /// Iterate over packets, calling `f` for each one.
    /// Return `false` from `f` to stop capture.
    pub fn for_each_packet<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(PacketData) -> bool,
    {
        loop {
            let raw = match self {
                PacketSource::Live(cap) => cap.next_packet(),
                PacketSource::File(cap) => cap.next_packet(),
            };

            match raw {
                Ok(packet) => {
                    let tv = packet.header.ts;
                    // Clamp tv_usec against malformed pcap files before
                    // folding into fractional seconds.
                    let secs = (tv.tv_sec as i64).max(0) as f64;
                    let usec = (tv.tv_usec as i64).clamp(0, 999_999) as f64;
                    let pkt = PacketData {
                        data: packet.data,
                        timestamp: secs + usec / 1_000_000.0,
                    };

                    if !f(pkt) {
                        break;
                    }
                }
                Err(pcap::Error::NoMorePackets) => break,
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

/// The frame parser expects Ethernet II. Other link types still flow through
/// (the parser drops what it cannot read) but deserve a heads-up.
fn warn_on_unsupported_link_type(dl: pcap::Linktype) {
    // DLT_EN10MB
    if dl.0 != 1 {
        eprintln!(
            "Warning: unsupported link type {} ({}); expecting Ethernet frames",
            dl.get_name().unwrap_or_default(),
            dl.0
        );
    }
}

/// List capture devices for `--list-interfaces`.
pub fn list_interfaces() -> Result<Vec<(String, String, Vec<String>)>> {
    let devices = Device::list()?;
    Ok(devices
        .into_iter()
        .map(|dev| {
            let desc = dev.desc.clone().unwrap_or_default();
            let addrs = dev.addresses.iter().map(|a| a.addr.to_string()).collect();
            (dev.name, desc, addrs)
        })
        .collect())
}
