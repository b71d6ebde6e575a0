//! # Pcap Capture File
//!
//! Writes captured datagrams in the classic libpcap container format.
//!
//! Frames are stored with `LINKTYPE_RAW`: each record is a synthesized IPv4
//! (or IPv6) header plus UDP header in front of the received payload, with valid
//! checksums, so standard tools dissect the OSC traffic directly.
//!
//! ## File Layout
//!
//! | Part | Size | Content |
//! |------|------|---------|
//! | Global header | 24 | magic, version 2.4, zone, sigfigs, snaplen, linktype |
//! | Record header | 16 | ts_sec, ts_usec, incl_len, orig_len |
//! | Record data | incl_len | IP packet, truncated to snaplen |
//!
//! All header fields are little-endian.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{info, warn};

use super::{FrameStore, RawFrame};
use crate::error::{Result, SnifferError};

/// Microsecond-resolution pcap magic number
pub const PCAP_MAGIC: u32 = 0xA1B2_C3D4;

/// Format version written to the global header
pub const PCAP_VERSION_MAJOR: u16 = 2;
pub const PCAP_VERSION_MINOR: u16 = 4;

/// Raw IP link type (no link-layer header)
pub const LINKTYPE_RAW: u32 = 101;

/// Global header size in bytes
pub const GLOBAL_HEADER_LEN: usize = 24;

/// Per-record header size in bytes
pub const RECORD_HEADER_LEN: usize = 16;

const IPV4_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const UDP_HEADER_LEN: usize = 8;
const IP_PROTO_UDP: u8 = 17;
const DEFAULT_TTL: u8 = 64;

/// Append-only pcap file
pub struct PcapFileStore {
    file: File,
    path: PathBuf,
    snaplen: u32,
    /// File length after the last complete batch
    committed_len: u64,
}

impl std::fmt::Debug for PcapFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcapFileStore")
            .field("path", &self.path)
            .field("snaplen", &self.snaplen)
            .finish_non_exhaustive()
    }
}

impl PcapFileStore {
    /// Open a capture file for appending, creating it if needed.
    ///
    /// A new or empty file gets a global header. An existing file must carry a
    /// compatible header (same magic and link type); its records are kept and
    /// new ones go after them.
    ///
    /// # Errors
    ///
    /// Returns [`SnifferError::Capture`] if the file cannot be opened, or if it
    /// already holds something other than a raw-IP pcap capture
    pub fn open<P: AsRef<Path>>(path: P, snaplen: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let capture_err = |e: std::io::Error| {
            SnifferError::Capture(format!("Failed to open {}: {}", path.display(), e))
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(capture_err)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(capture_err)?;

        let existing = file.metadata().map_err(capture_err)?.len();
        if existing == 0 {
            file.write_all(&global_header(snaplen))
                .and_then(|_| file.sync_data())
                .map_err(capture_err)?;
            info!("Created capture file {}", path.display());
        } else {
            let mut header = [0u8; GLOBAL_HEADER_LEN];
            file.read_exact(&mut header).map_err(|_| {
                let reason = format!("{} is not a pcap file (truncated header)", path.display());
                SnifferError::Capture(reason)
            })?;
            check_global_header(&header).map_err(|reason| {
                SnifferError::Capture(format!("{}: {}", path.display(), reason))
            })?;
            info!("Appending to existing capture file {} ({} bytes)", path.display(), existing);
        }

        let committed_len = file.metadata().map_err(capture_err)?.len();
        Ok(Self {
            file,
            path,
            snaplen,
            committed_len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameStore for PcapFileStore {
    fn append(&mut self, frames: &[RawFrame]) -> Result<()> {
        let mut batch = BytesMut::new();
        for frame in frames {
            write_record(&mut batch, frame, self.snaplen);
        }

        let written = self.file.write_all(&batch).and_then(|_| self.file.sync_data());
        if let Err(e) = written {
            // drop a partially written batch so the retry does not follow garbage
            if let Err(trunc) = self.file.set_len(self.committed_len) {
                warn!("Failed to roll back {}: {}", self.path.display(), trunc);
            }
            return Err(SnifferError::Capture(format!(
                "Failed to write {} frames to {}: {}",
                frames.len(),
                self.path.display(),
                e
            )));
        }

        self.committed_len += batch.len() as u64;
        Ok(())
    }
}

/// Global header for a new capture file
pub fn global_header(snaplen: u32) -> [u8; GLOBAL_HEADER_LEN] {
    let mut buf = BytesMut::with_capacity(GLOBAL_HEADER_LEN);
    buf.put_u32_le(PCAP_MAGIC);
    buf.put_u16_le(PCAP_VERSION_MAJOR);
    buf.put_u16_le(PCAP_VERSION_MINOR);
    buf.put_i32_le(0); // thiszone
    buf.put_u32_le(0); // sigfigs
    buf.put_u32_le(snaplen);
    buf.put_u32_le(LINKTYPE_RAW);

    let mut header = [0u8; GLOBAL_HEADER_LEN];
    header.copy_from_slice(&buf);
    header
}

fn check_global_header(header: &[u8; GLOBAL_HEADER_LEN]) -> std::result::Result<(), String> {
    let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if magic != PCAP_MAGIC {
        return Err(format!("unsupported pcap magic 0x{:08X}", magic));
    }
    let linktype = u32::from_le_bytes([header[20], header[21], header[22], header[23]]);
    if linktype != LINKTYPE_RAW {
        return Err(format!("link type {} does not match raw IP ({})", linktype, LINKTYPE_RAW));
    }
    Ok(())
}

/// Encode one record (header + packet) into `out`
pub fn write_record(out: &mut BytesMut, frame: &RawFrame, snaplen: u32) {
    let packet = encode_ip_packet(frame);
    let orig_len = packet.len();
    let incl_len = orig_len.min(snaplen as usize);

    out.reserve(RECORD_HEADER_LEN + incl_len);
    out.put_u32_le(frame.captured_at.timestamp() as u32);
    out.put_u32_le(frame.captured_at.timestamp_subsec_micros());
    out.put_u32_le(incl_len as u32);
    out.put_u32_le(orig_len as u32);
    out.put_slice(&packet[..incl_len]);
}

/// Wrap the datagram payload in UDP and IP headers.
///
/// Both endpoints IPv4 gives an IPv4 packet; anything else is written as IPv6
/// with IPv4 addresses mapped.
pub fn encode_ip_packet(frame: &RawFrame) -> Bytes {
    let udp_len = UDP_HEADER_LEN + frame.payload.len();
    let sport = frame.source.port();
    let dport = frame.destination.port();

    match (frame.source.ip(), frame.destination.ip()) {
        (IpAddr::V4(src), IpAddr::V4(dst)) => {
            let mut buf = BytesMut::with_capacity(IPV4_HEADER_LEN + udp_len);
            put_ipv4_header(&mut buf, src, dst, udp_len);
            let pseudo = ipv4_pseudo_header(src, dst, udp_len);
            put_udp(&mut buf, &pseudo, sport, dport, &frame.payload);
            buf.freeze()
        }
        (src, dst) => {
            let (src, dst) = (as_ipv6(src), as_ipv6(dst));
            let mut buf = BytesMut::with_capacity(IPV6_HEADER_LEN + udp_len);
            put_ipv6_header(&mut buf, src, dst, udp_len);
            let pseudo = ipv6_pseudo_header(src, dst, udp_len);
            put_udp(&mut buf, &pseudo, sport, dport, &frame.payload);
            buf.freeze()
        }
    }
}

fn as_ipv6(ip: IpAddr) -> Ipv6Addr {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

fn len_u16(len: usize) -> u16 {
    u16::try_from(len).unwrap_or(u16::MAX)
}

fn put_ipv4_header(buf: &mut BytesMut, src: Ipv4Addr, dst: Ipv4Addr, udp_len: usize) {
    let start = buf.len();
    buf.put_u8(0x45); // version 4, IHL 5
    buf.put_u8(0); // DSCP/ECN
    buf.put_u16(len_u16(IPV4_HEADER_LEN + udp_len));
    buf.put_u16(0); // identification
    buf.put_u16(0x4000); // don't fragment
    buf.put_u8(DEFAULT_TTL);
    buf.put_u8(IP_PROTO_UDP);
    buf.put_u16(0); // checksum placeholder
    buf.put_slice(&src.octets());
    buf.put_slice(&dst.octets());

    let checksum = checksum_finish(checksum_add(0, &buf[start..start + IPV4_HEADER_LEN]));
    buf[start + 10..start + 12].copy_from_slice(&checksum.to_be_bytes());
}

fn put_ipv6_header(buf: &mut BytesMut, src: Ipv6Addr, dst: Ipv6Addr, udp_len: usize) {
    buf.put_u32(0x6000_0000); // version 6, no traffic class or flow label
    buf.put_u16(len_u16(udp_len));
    buf.put_u8(IP_PROTO_UDP);
    buf.put_u8(DEFAULT_TTL);
    buf.put_slice(&src.octets());
    buf.put_slice(&dst.octets());
}

fn ipv4_pseudo_header(src: Ipv4Addr, dst: Ipv4Addr, udp_len: usize) -> Vec<u8> {
    let mut pseudo = Vec::with_capacity(12);
    pseudo.extend_from_slice(&src.octets());
    pseudo.extend_from_slice(&dst.octets());
    pseudo.push(0);
    pseudo.push(IP_PROTO_UDP);
    pseudo.extend_from_slice(&len_u16(udp_len).to_be_bytes());
    pseudo
}

fn ipv6_pseudo_header(src: Ipv6Addr, dst: Ipv6Addr, udp_len: usize) -> Vec<u8> {
    let mut pseudo = Vec::with_capacity(40);
    pseudo.extend_from_slice(&src.octets());
    pseudo.extend_from_slice(&dst.octets());
    pseudo.extend_from_slice(&(udp_len as u32).to_be_bytes());
    pseudo.extend_from_slice(&[0, 0, 0, IP_PROTO_UDP]);
    pseudo
}

fn put_udp(buf: &mut BytesMut, pseudo: &[u8], sport: u16, dport: u16, payload: &[u8]) {
    let start = buf.len();
    buf.put_u16(sport);
    buf.put_u16(dport);
    buf.put_u16(len_u16(UDP_HEADER_LEN + payload.len()));
    buf.put_u16(0); // checksum placeholder
    buf.put_slice(payload);

    let sum = checksum_add(checksum_add(0, pseudo), &buf[start..]);
    // all-zero means "no checksum" in UDP, so a computed zero is sent as all ones
    let checksum = match checksum_finish(sum) {
        0 => 0xFFFF,
        c => c,
    };
    buf[start + 6..start + 8].copy_from_slice(&checksum.to_be_bytes());
}

/// Add `data` to a running ones'-complement sum of big-endian 16-bit words
fn checksum_add(mut sum: u32, data: &[u8]) -> u32 {
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    sum
}

fn checksum_finish(mut sum: u32) -> u16 {
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}
