//! Offline packet source: a legacy-format capture file filtered down to
//! the UDP datagrams of one sensor.

use std::fs::File;
use std::path::Path;

use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError};
use tracing::info;

use crate::OfflineError;

const READER_CAPACITY: usize = 65536;

const ETH_HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const IP_PROTOCOL_UDP: u8 = 17;

/// Reads UDP payloads addressed to one destination port, in capture
/// order.
pub struct PcapSource {
    reader: LegacyPcapReader<File>,
    udp_port: u16,
    skipped: u64,
}

impl PcapSource {
    pub fn open(path: &Path, udp_port: u16) -> Result<Self, OfflineError> {
        let file = File::open(path)?;
        let reader = LegacyPcapReader::new(READER_CAPACITY, file)
            .map_err(|e| OfflineError::Pcap(format!("{e:?}")))?;
        info!(path = %path.display(), udp_port, "opened capture");
        Ok(Self {
            reader,
            udp_port,
            skipped: 0,
        })
    }

    /// Datagrams that were not UDP-to-our-port (or not parseable link
    /// frames) and were passed over.
    pub fn skipped_count(&self) -> u64 {
        self.skipped
    }

    /// The next matching UDP payload with its capture timestamp, or
    /// `None` at end of file.
    pub fn next_payload(&mut self) -> Result<Option<(Vec<u8>, u64)>, OfflineError> {
        loop {
            let consumed = match self.reader.next() {
                Ok((offset, block)) => {
                    let item = match block {
                        PcapBlockOwned::Legacy(b) => {
                            let capture_ns = u64::from(b.ts_sec) * 1_000_000_000
                                + u64::from(b.ts_usec) * 1_000;
                            match extract_udp_payload(b.data, self.udp_port) {
                                Some(payload) => Some((payload.to_vec(), capture_ns)),
                                None => {
                                    self.skipped += 1;
                                    None
                                }
                            }
                        }
                        PcapBlockOwned::LegacyHeader(_) | PcapBlockOwned::NG(_) => None,
                    };
                    Some((offset, item))
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    self.reader
                        .refill()
                        .map_err(|e| OfflineError::Pcap(format!("{e:?}")))?;
                    None
                }
                Err(e) => return Err(OfflineError::Pcap(format!("{e:?}"))),
            };
            if let Some((offset, item)) = consumed {
                self.reader.consume(offset);
                if let Some(found) = item {
                    return Ok(Some(found));
                }
            }
        }
    }
}

/// Strip Ethernet + IPv4 + UDP framing, returning the payload when the
/// datagram is UDP to `udp_port`.
fn extract_udp_payload(frame: &[u8], udp_port: u16) -> Option<&[u8]> {
    if frame.len() < ETH_HEADER_LEN {
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }
    let ip = &frame[ETH_HEADER_LEN..];
    if ip.len() < 20 || ip[0] >> 4 != 4 {
        return None;
    }
    let ihl = usize::from(ip[0] & 0x0f) * 4;
    if ihl < 20 || ip.len() < ihl + 8 {
        return None;
    }
    if ip[9] != IP_PROTOCOL_UDP {
        return None;
    }
    let udp = &ip[ihl..];
    let dest_port = u16::from_be_bytes([udp[2], udp[3]]);
    if dest_port != udp_port {
        return None;
    }
    let udp_len = usize::from(u16::from_be_bytes([udp[4], udp[5]]));
    if udp_len < 8 || udp.len() < udp_len {
        return None;
    }
    Some(&udp[8..udp_len])
}
