use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::DumpError;

/// Stream header: "SVN" followed by the format version byte.
const SVNDIFF1_HEADER: &[u8; 4] = b"SVN\x01";

/// Sections shorter than this are never worth compressing, matching the
/// reference encoder's threshold.
const MIN_COMPRESS_SIZE: usize = 512;

/// One instruction of a delta window. Offsets are relative to the source view
/// (for `CopySource`) or to the start of the target view built so far (for
/// `CopyTarget`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaOp {
    CopySource { offset: u64, len: u64 },
    CopyTarget { offset: u64, len: u64 },
    CopyNew { len: u64 },
}

/// One window of a binary text delta, as delivered by the driver. The editor
/// treats the sequence of windows as opaque content to re-encode and count;
/// it never applies them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaWindow {
    pub sview_offset: u64,
    pub sview_len: u64,
    pub tview_len: u64,
    pub ops: Vec<DeltaOp>,
    #[serde(with = "serde_bytes")] // Make serde fast
    pub new_data: Vec<u8>,
}

impl DeltaWindow {
    /// A self-contained window that reproduces `text` from nothing. Handy for
    /// synthesizing recorded histories and fixtures.
    pub fn from_new_data(text: &[u8]) -> DeltaWindow {
        DeltaWindow {
            sview_offset: 0,
            sview_len: 0,
            tview_len: text.len() as u64,
            ops: vec![DeltaOp::CopyNew { len: text.len() as u64 }],
            new_data: text.to_vec(),
        }
    }
}

/// Streaming svndiff v1 encoder. The 4-byte stream header is written up
/// front; each window is appended with `write_window`.
pub struct SvndiffWriter<W: Write> {
    out: W,
}

impl<W: Write> SvndiffWriter<W> {
    pub fn new(mut out: W) -> Result<SvndiffWriter<W>, DumpError> {
        out.write_all(SVNDIFF1_HEADER)?;
        Ok(SvndiffWriter { out })
    }

    pub fn write_window(&mut self, window: &DeltaWindow) -> Result<(), DumpError> {
        // Windows that don't account for their own target view are a bug in
        // whoever produced them, not an I/O condition.
        let op_total: u64 = window
            .ops
            .iter()
            .map(|op| match op {
                DeltaOp::CopySource { len, .. }
                | DeltaOp::CopyTarget { len, .. }
                | DeltaOp::CopyNew { len } => *len,
            })
            .sum();
        assert_eq!(
            op_total, window.tview_len,
            "delta window instructions produce {} bytes but the target view is {}",
            op_total, window.tview_len
        );
        let new_total: u64 = window
            .ops
            .iter()
            .map(|op| match op {
                DeltaOp::CopyNew { len } => *len,
                _ => 0,
            })
            .sum();
        assert_eq!(
            new_total,
            window.new_data.len() as u64,
            "delta window carries {} bytes of new data but its instructions consume {}",
            window.new_data.len(),
            new_total
        );

        let mut instructions = Vec::new();
        for op in &window.ops {
            encode_instruction(&mut instructions, op);
        }
        let instr_section = encode_section(&instructions);
        let data_section = encode_section(&window.new_data);

        let mut header = Vec::new();
        write_varint(&mut header, window.sview_offset);
        write_varint(&mut header, window.sview_len);
        write_varint(&mut header, window.tview_len);
        write_varint(&mut header, instr_section.len() as u64);
        write_varint(&mut header, data_section.len() as u64);

        self.out.write_all(&header)?;
        self.out.write_all(&instr_section)?;
        self.out.write_all(&data_section)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<W, DumpError> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Encodes an integer in the 7-bits-per-byte big-endian form the format uses:
/// high-order groups first, continuation bit set on every byte but the last.
fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    let mut bytes = [0u8; 10];
    let mut n = 0;
    loop {
        bytes[n] = (value & 0x7f) as u8;
        value >>= 7;
        n += 1;
        if value == 0 {
            break;
        }
    }
    while n > 1 {
        n -= 1;
        out.push(bytes[n] | 0x80);
    }
    out.push(bytes[0]);
}

fn encode_instruction(out: &mut Vec<u8>, op: &DeltaOp) {
    let (selector, len, offset) = match op {
        DeltaOp::CopySource { offset, len } => (0u8, *len, Some(*offset)),
        DeltaOp::CopyTarget { offset, len } => (1u8, *len, Some(*offset)),
        DeltaOp::CopyNew { len } => (2u8, *len, None),
    };
    // A length that fits in six bits rides along in the opcode byte; zero
    // there means the real length follows as a varint.
    if len > 0 && len < 64 {
        out.push((selector << 6) | len as u8);
    } else {
        out.push(selector << 6);
        write_varint(out, len);
    }
    if let Some(offset) = offset {
        write_varint(out, offset);
    }
}

/// In v1 each of the instructions and new-data sections is prefixed with its
/// original length; the payload is zlib-compressed only when that actually
/// saves bytes (decoders detect the raw case by the payload length matching
/// the prefix).
fn encode_section(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(&mut out, data.len() as u64);
    if data.len() >= MIN_COMPRESS_SIZE {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        // Writing to a Vec cannot fail.
        enc.write_all(data).unwrap();
        let compressed = enc.finish().unwrap();
        if compressed.len() < data.len() {
            out.extend_from_slice(&compressed);
            return out;
        }
    }
    out.extend_from_slice(data);
    out
}
