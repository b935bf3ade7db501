use std::path::Path;
use std::process::Command;

fn maplesniff() -> Command {
    Command::new(env!("CARGO_BIN_EXE_maplesniff"))
}

#[test]
fn help_succeeds() {
    let output = maplesniff().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Passive sniffer"));
}

#[test]
fn version_succeeds() {
    let output = maplesniff().arg("--version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("maplesniff"));
}

#[test]
fn nonexistent_input_file_fails() {
    let output = maplesniff()
        .args(["-I", "/nonexistent/path/file.pcap"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn snaplen_validates_range() {
    let output = maplesniff().args(["-s", "10"]).output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn empty_pcap_reads_without_panic() {
    let dir = std::env::temp_dir();
    let path = dir.join("maplesniff_test_empty.pcap");
    write_pcap(&path, &[]);

    let output = maplesniff()
        .args(["-I", path.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());

    let _ = std::fs::remove_file(&path);
}

#[test]
fn invalid_bpf_filter_fails() {
    let dir = std::env::temp_dir();
    let path = dir.join("maplesniff_test_bpf.pcap");
    write_pcap(&path, &[]);

    let output = maplesniff()
        .args(["-I", path.to_str().unwrap(), "-F", "not a filter ((("])
        .output()
        .unwrap();
    assert!(!output.status.success());

    let _ = std::fs::remove_file(&path);
}

#[test]
fn pcap_file_decodes_handshake_as_json() {
    let dir = std::env::temp_dir();
    let path = dir.join("maplesniff_test_session.pcap");

    let handshake = standard_handshake(83, "3274", 6);
    let frames = vec![
        eth_frame([10, 0, 0, 1], [10, 0, 0, 2], 49152, 8484, 1000, 0x02, &[]),
        eth_frame([10, 0, 0, 2], [10, 0, 0, 1], 8484, 49152, 3000, 0x12, &[]),
        eth_frame(
            [10, 0, 0, 2],
            [10, 0, 0, 1],
            8484,
            49152,
            3001,
            0x18,
            &handshake,
        ),
    ];
    write_pcap(&path, &frames);

    let output = maplesniff()
        .args(["-I", path.to_str().unwrap(), "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"type\":\"handshake\""), "stdout: {stdout}");
    assert!(stdout.contains("\"version\":83"), "stdout: {stdout}");
    assert!(stdout.contains("\"subVersion\":\"3274\""), "stdout: {stdout}");

    let _ = std::fs::remove_file(&path);
}

// =============================================================================
// Pcap helpers
// =============================================================================

/// Write a classic pcap (Ethernet link type) with the given frames.
fn write_pcap(path: &Path, frames: &[Vec<u8>]) {
    let mut out = Vec::new();
    // Global header: magic, v2.4, zone 0, sigfigs 0, snaplen, DLT_EN10MB
    out.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&65535u32.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());

    for (i, frame) in frames.iter().enumerate() {
        out.extend_from_slice(&(1_700_000_000u32 + i as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(frame);
    }

    std::fs::write(path, out).unwrap();
}

fn eth_frame(
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
    src_port: u16,
    dst_port: u16,
    seq: u32,
    flags_byte: u8,
    payload: &[u8],
) -> Vec<u8> {
    use etherparse::PacketBuilder;
    let builder = PacketBuilder::ethernet2([0; 6], [0; 6])
        .ipv4(src_ip, dst_ip, 64)
        .tcp(src_port, dst_port, seq, 65535);
    let mut buf = Vec::new();
    builder.write(&mut buf, payload).unwrap();
    buf[14 + 20 + 13] = flags_byte;
    buf
}

fn standard_handshake(version: u16, patch: &str, locale: u8) -> Vec<u8> {
    let size = (2 + 2 + patch.len() + 9) as u16;
    let mut buf = size.to_le_bytes().to_vec();
    buf.extend_from_slice(&version.to_le_bytes());
    buf.extend_from_slice(&(patch.len() as u16).to_le_bytes());
    buf.extend_from_slice(patch.as_bytes());
    buf.extend_from_slice(&[0, 1, 2, 3]);
    buf.extend_from_slice(&[4, 5, 6, 7]);
    buf.push(locale);
    buf
}
