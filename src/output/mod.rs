use colored::Colorize;
use serde_json::json;

use crate::analyzer::SessionInfo;
use crate::stream::{DecryptedPacket, RecordKind};

pub struct Formatter {
    json: bool,
    hex: bool,
    quiet: bool,
}

impl Formatter {
    pub fn new(json: bool, hex: bool, quiet: bool) -> Self {
        Formatter { json, hex, quiet }
    }

    pub fn print_record(&self, record: &DecryptedPacket) {
        if self.json {
            self.print_record_json(record);
        } else {
            self.print_record_text(record);
        }
    }

    fn print_record_text(&self, record: &DecryptedPacket) {
        if !self.quiet {
            let tag = format!("[{}]", record.session_id);
            match record.kind {
                RecordKind::Handshake => {
                    println!(
                        "{} {} v{} sub={} locale={} port={}",
                        tag.cyan(),
                        "HANDSHAKE".magenta().bold(),
                        record.version,
                        record.sub_version,
                        record.locale,
                        record.server_port,
                    );
                }
                RecordKind::Dead => {
                    println!(
                        "{} {} {} stream lost sync",
                        tag.cyan(),
                        "DEAD".red().bold(),
                        direction(record.outbound),
                    );
                }
                RecordKind::Data => {
                    println!(
                        "{} {} {} ({} bytes) port={}",
                        tag.cyan(),
                        direction(record.outbound),
                        format_opcode(record.opcode).yellow(),
                        record.length,
                        record.server_port,
                    );
                }
            }
        }

        if self.hex && !record.hex_dump.is_empty() {
            println!("{}", record.hex_dump);
        }
    }

    fn print_record_json(&self, record: &DecryptedPacket) {
        let mut j = json!({
            "type": kind_str(record.kind),
            "timestamp": record.timestamp,
            "session": record.session_id,
            "serverPort": record.server_port,
            "outbound": record.outbound,
            "opcode": record.opcode,
            "length": record.length,
            "hexDump": record.hex_dump,
        });
        if record.kind == RecordKind::Handshake {
            j["version"] = json!(record.version);
            j["subVersion"] = json!(record.sub_version);
            j["locale"] = json!(record.locale);
        }
        println!("{}", j);
    }

    /// End-of-capture session summary.
    pub fn print_sessions(&self, sessions: &[SessionInfo]) {
        if self.json {
            for info in sessions {
                let j = json!({
                    "type": "session",
                    "session": info.id,
                    "version": info.version,
                    "subVersion": info.sub_version,
                    "locale": info.locale,
                    "server": format!("{}:{}", info.server_ip, info.server_port),
                    "clientPort": info.client_port,
                });
                println!("{}", j);
            }
        } else {
            for info in sessions {
                println!(
                    "{} v{} sub={} locale={} server={}:{} client port {}",
                    format!("session {}", info.id).cyan().bold(),
                    info.version,
                    info.sub_version,
                    info.locale,
                    info.server_ip,
                    info.server_port,
                    info.client_port,
                );
            }
        }
    }
}

fn direction(outbound: bool) -> &'static str {
    if outbound { "SEND" } else { "RECV" }
}

fn kind_str(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Data => "data",
        RecordKind::Handshake => "handshake",
        RecordKind::Dead => "dead",
    }
}

fn format_opcode(opcode: u16) -> String {
    format!("0x{:04X}", opcode)
}
