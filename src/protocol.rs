//! Tuya manufacturer-specific cluster (0xEF00) wire protocol.
//! Handles datapoint framing, sequence numbering and report parsing.
//!
//! Frame layout (all multi-byte fields big-endian):
//!
//! ```text
//! status:u8 | seq:u8 | dp:u8 | type:u8 | len:u16 | data[len] | (dp | type | len | data)*
//! ```

use crate::error::{BridgeError, Result};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use log::debug;

/// Size of the `status | seq` frame prefix.
pub const FRAME_HEADER_LEN: usize = 2;
/// Size of the `dp | type | len` record header.
pub const RECORD_HEADER_LEN: usize = 4;

define_wire_enum! {
    /// Commands of the Tuya cluster.
    pub enum TuyaCommand {
        SetData = 0x00,
        DataReport = 0x01,
        /// Newer firmware reports through 0x02 instead of 0x01.
        DataReportAlt = 0x02,
        DataQuery = 0x03,
        McuSyncTime = 0x24,
    }
}

impl TuyaCommand {
    /// Commands whose payload is a datapoint report.
    pub fn is_report(self) -> bool {
        matches!(self, TuyaCommand::DataReport | TuyaCommand::DataReportAlt)
    }
}

define_wire_enum! {
    /// Datapoint payload type tag.
    pub enum DataType {
        Raw = 0x00,
        Bool = 0x01,
        /// 32-bit signed big-endian integer.
        Value = 0x02,
        String = 0x03,
        Enum = 0x04,
        Bitmap = 0x05,
    }
}

/// A single datapoint record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datapoint {
    pub dp: u8,
    pub data_type: DataType,
    pub data: Vec<u8>,
}

impl Datapoint {
    pub fn new(dp: u8, data_type: DataType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            dp,
            data_type,
            data: data.into(),
        }
    }
}

/// A datapoint frame as carried by `setData` or `dataReport`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpFrame {
    /// Sequence number
    pub seqno: u8,
    /// One or more datapoint records (reports may batch several)
    pub datapoints: Vec<Datapoint>,
}

impl DpFrame {
    /// The first record of the frame.
    pub fn primary(&self) -> Option<&Datapoint> {
        self.datapoints.first()
    }

    /// Pack the frame into the cluster command payload.
    pub fn pack(&self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(
            FRAME_HEADER_LEN
                + self
                    .datapoints
                    .iter()
                    .map(|d| RECORD_HEADER_LEN + d.data.len())
                    .sum::<usize>(),
        );
        data.write_u8(0)?;
        data.write_u8(self.seqno)?;
        for record in &self.datapoints {
            let len = u16::try_from(record.data.len()).map_err(|_| {
                BridgeError::DecodeError(format!(
                    "DP {} payload of {} bytes exceeds frame limit",
                    record.dp,
                    record.data.len()
                ))
            })?;
            data.write_u8(record.dp)?;
            data.write_u8(record.data_type.as_u8())?;
            data.write_u16::<BigEndian>(len)?;
            data.extend_from_slice(&record.data);
        }
        Ok(data)
    }
}

/// Per-session sequence counter, wrapping at 256.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    next: u8,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current sequence number and advances the counter.
    pub fn next_seqno(&mut self) -> u8 {
        let current = self.next;
        self.next = self.next.wrapping_add(1);
        current
    }

    /// The sequence number the next frame will carry.
    pub fn peek(&self) -> u8 {
        self.next
    }
}

/// Build a `setData` frame for one datapoint, consuming a sequence number.
pub fn encode_set_data(
    counter: &mut SequenceCounter,
    dp: u8,
    data_type: DataType,
    data: impl Into<Vec<u8>>,
) -> DpFrame {
    let seqno = counter.next_seqno();
    let data = data.into();
    debug!(
        "Building setData: seqno={}, dp={}, type={:?}, payload_len={}",
        seqno,
        dp,
        data_type,
        data.len()
    );
    DpFrame {
        seqno,
        datapoints: vec![Datapoint::new(dp, data_type, data)],
    }
}

/// Build a `dataQuery` payload (`status | seq`, no records).
pub fn encode_data_query(counter: &mut SequenceCounter) -> Result<Vec<u8>> {
    DpFrame {
        seqno: counter.next_seqno(),
        datapoints: Vec::new(),
    }
    .pack()
}

/// Parse a `dataReport` payload into its records.
pub fn decode_data_report(data: &[u8]) -> Result<DpFrame> {
    if data.len() < FRAME_HEADER_LEN + RECORD_HEADER_LEN {
        return Err(BridgeError::DecodeError(format!(
            "Frame too short: {} bytes",
            data.len()
        )));
    }

    let seqno = data[1];
    let mut offset = FRAME_HEADER_LEN;
    let mut datapoints = Vec::new();

    while offset < data.len() {
        if data.len() - offset < RECORD_HEADER_LEN {
            return Err(BridgeError::DecodeError(format!(
                "Truncated record header at offset {}",
                offset
            )));
        }
        let dp = data[offset];
        let type_tag = data[offset + 1];
        let data_type = DataType::from_u8(type_tag).ok_or_else(|| {
            BridgeError::DecodeError(format!("Unknown data type 0x{:02X} for DP {}", type_tag, dp))
        })?;
        let len = BigEndian::read_u16(&data[offset + 2..offset + 4]) as usize;
        let start = offset + RECORD_HEADER_LEN;
        let end = start + len;
        if end > data.len() {
            return Err(BridgeError::DecodeError(format!(
                "DP {} declares {} bytes, only {} available",
                dp,
                len,
                data.len() - start
            )));
        }
        datapoints.push(Datapoint::new(dp, data_type, &data[start..end]));
        offset = end;
    }

    Ok(DpFrame { seqno, datapoints })
}

/// Payload answering a `mcuSyncTime` request: `seq:u16 | utc:u32 | local:u32`.
pub fn time_sync_payload(request: &[u8], utc_secs: u32, local_secs: u32) -> Result<Vec<u8>> {
    let seq = match request {
        [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
        _ => 0,
    };
    let mut data = Vec::with_capacity(10);
    data.write_u16::<BigEndian>(seq)?;
    data.write_u32::<BigEndian>(utc_secs)?;
    data.write_u32::<BigEndian>(local_secs)?;
    Ok(data)
}
