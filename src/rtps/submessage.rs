use std::io;

use bytes::Bytes;
use enumflags2::BitFlags;
use log::{debug, trace, warn};
use speedy::{Context, Readable, Writable, Writer};

use crate::{
  messages::submessages::{
    submessage_flag::{
      endianness_flag, ACKNACK_Flags, DATAFRAG_Flags, DATA_Flags, GAP_Flags,
      HEARTBEATFRAG_Flags, HEARTBEAT_Flags, INFODESTINATION_Flags, INFOSOURCE_Flags,
      INFOTIMESTAMP_Flags, NACKFRAG_Flags,
    },
    submessage_kind::SubmessageKind,
    submessages::*,
  },
  structure::time::Timestamp,
};

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Submessage {
  pub header: SubmessageHeader,
  pub body: SubmessageBody,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SubmessageBody {
  Writer(WriterSubmessage),
  Reader(ReaderSubmessage),
  Interpreter(InterpreterSubmessage),
}

// We implement this instead of Speedy trait Readable, because
// we need to run-time decide which endianness we input. Speedy requires the
// top level to fix that.
impl Submessage {
  /// Splits the next submessage off `buffer` and parses it.
  ///
  /// `Err` means the submessage header is inconsistent with the remaining
  /// message, and the rest of the message cannot be parsed. `Ok(None)` means
  /// this submessage was skipped (PAD, unknown kind, or malformed body) and
  /// parsing may continue.
  pub fn read_from_buffer(buffer: &mut Bytes) -> io::Result<Option<Self>> {
    if buffer.len() < SubmessageHeader::LENGTH {
      return Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("{} trailing bytes cannot hold a submessage header", buffer.len()),
      ));
    }
    let sub_header = SubmessageHeader::read_from_buffer(&buffer[..SubmessageHeader::LENGTH])
      .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let header_length = SubmessageHeader::LENGTH;
    let proposed_content_length = if sub_header.content_length == 0 {
      // RTPS spec 2.3, section 9.4.5.1.3: octetsToNextHeader == 0 means the
      // submessage extends to the end of the message, except for PAD and
      // INFO_TS, where it means an empty body.
      match sub_header.kind {
        SubmessageKind::PAD | SubmessageKind::INFO_TS => 0,
        _ => buffer.len() - header_length,
      }
    } else {
      sub_header.content_length as usize
    };
    if header_length + proposed_content_length > buffer.len() {
      return Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!(
          "Submessage header declares length larger than remaining message size: {} + {} > {}",
          header_length,
          proposed_content_length,
          buffer.len()
        ),
      ));
    }

    let mut sub_buffer = buffer.split_to(header_length + proposed_content_length);
    let content = sub_buffer.split_off(header_length);

    match Self::parse_body(sub_header, &content) {
      Ok(body) => Ok(body.map(|body| Self {
        header: sub_header,
        body,
      })),
      Err(e) => {
        warn!(
          "Discarding malformed {:?} submessage: {}",
          sub_header.kind, e
        );
        Ok(None)
      }
    }
  }

  fn parse_body(sub_header: SubmessageHeader, content: &Bytes) -> io::Result<Option<SubmessageBody>> {
    let e = endianness_flag(sub_header.flags);
    let invalid = |err: speedy::Error| io::Error::new(io::ErrorKind::InvalidData, err);
    let body = match sub_header.kind {
      SubmessageKind::DATA => {
        // Manually implemented deserialization for DATA. Speedy does not quite cut it.
        let f = BitFlags::<DATA_Flags>::from_bits_truncate(sub_header.flags);
        SubmessageBody::Writer(WriterSubmessage::Data(Data::deserialize_data(content, f)?, f))
      }
      SubmessageKind::GAP => {
        let f = BitFlags::<GAP_Flags>::from_bits_truncate(sub_header.flags);
        let gap = Gap::read_from_buffer_with_ctx(e, content).map_err(invalid)?;
        if !gap.is_valid() {
          return Err(out_of_range(&gap));
        }
        SubmessageBody::Writer(WriterSubmessage::Gap(gap, f))
      }
      SubmessageKind::HEARTBEAT => {
        let f = BitFlags::<HEARTBEAT_Flags>::from_bits_truncate(sub_header.flags);
        let heartbeat = Heartbeat::read_from_buffer_with_ctx(e, content).map_err(invalid)?;
        if !heartbeat.is_valid() {
          return Err(out_of_range(&heartbeat));
        }
        SubmessageBody::Writer(WriterSubmessage::Heartbeat(heartbeat, f))
      }
      SubmessageKind::ACKNACK => {
        let f = BitFlags::<ACKNACK_Flags>::from_bits_truncate(sub_header.flags);
        let acknack = AckNack::read_from_buffer_with_ctx(e, content).map_err(invalid)?;
        if !acknack.is_valid() {
          return Err(out_of_range(&acknack));
        }
        SubmessageBody::Reader(ReaderSubmessage::AckNack(acknack, f))
      }
      SubmessageKind::DATA_FRAG => {
        let f = BitFlags::<DATAFRAG_Flags>::from_bits_truncate(sub_header.flags);
        SubmessageBody::Writer(WriterSubmessage::DataFrag(
          DataFrag::deserialize_data_frag(content, f)?,
          f,
        ))
      }
      SubmessageKind::HEARTBEAT_FRAG => {
        let f = BitFlags::<HEARTBEATFRAG_Flags>::from_bits_truncate(sub_header.flags);
        let hb_frag = HeartbeatFrag::read_from_buffer_with_ctx(e, content).map_err(invalid)?;
        if !hb_frag.is_valid() {
          return Err(out_of_range(&hb_frag));
        }
        SubmessageBody::Writer(WriterSubmessage::HeartbeatFrag(hb_frag, f))
      }
      SubmessageKind::NACK_FRAG => {
        let f = BitFlags::<NACKFRAG_Flags>::from_bits_truncate(sub_header.flags);
        let nack_frag = NackFrag::read_from_buffer_with_ctx(e, content).map_err(invalid)?;
        if !nack_frag.is_valid() {
          return Err(out_of_range(&nack_frag));
        }
        SubmessageBody::Reader(ReaderSubmessage::NackFrag(nack_frag, f))
      }
      SubmessageKind::INFO_DST => {
        let f = BitFlags::<INFODESTINATION_Flags>::from_bits_truncate(sub_header.flags);
        SubmessageBody::Interpreter(InterpreterSubmessage::InfoDestination(
          InfoDestination::read_from_buffer_with_ctx(e, content).map_err(invalid)?,
          f,
        ))
      }
      SubmessageKind::INFO_SRC => {
        let f = BitFlags::<INFOSOURCE_Flags>::from_bits_truncate(sub_header.flags);
        SubmessageBody::Interpreter(InterpreterSubmessage::InfoSource(
          InfoSource::read_from_buffer_with_ctx(e, content).map_err(invalid)?,
          f,
        ))
      }
      SubmessageKind::INFO_TS => {
        let f = BitFlags::<INFOTIMESTAMP_Flags>::from_bits_truncate(sub_header.flags);
        let timestamp = if f.contains(INFOTIMESTAMP_Flags::Invalidate) {
          None
        } else {
          Some(Timestamp::read_from_buffer_with_ctx(e, content).map_err(invalid)?)
        };
        SubmessageBody::Interpreter(InterpreterSubmessage::InfoTimestamp(
          InfoTimestamp { timestamp },
          f,
        ))
      }
      SubmessageKind::PAD => return Ok(None),
      unknown_kind => {
        if unknown_kind.is_vendor_specific() {
          trace!("Received vendor-specific submessage kind {:?}", unknown_kind);
        } else {
          debug!("Received unsupported submessage kind {:?}", unknown_kind);
        }
        return Ok(None);
      }
    };
    Ok(Some(body))
  }
}

fn out_of_range<T: std::fmt::Debug>(body: &T) -> io::Error {
  io::Error::new(
    io::ErrorKind::InvalidData,
    format!("sequence or fragment numbers out of range in {:?}", body),
  )
}

impl<C: Context> Writable<C> for Submessage {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.header)?;
    // Body endianness follows the submessage flags, whatever the context.
    let e = endianness_flag(self.header.flags);
    let body = match &self.body {
      SubmessageBody::Writer(m) => m.write_to_vec_with_ctx(e),
      SubmessageBody::Reader(m) => m.write_to_vec_with_ctx(e),
      SubmessageBody::Interpreter(m) => m.write_to_vec_with_ctx(e),
    };
    match body {
      Ok(bytes) => writer.write_bytes(&bytes),
      Err(e) => {
        warn!("Submessage body serialization failed: {:?}", e);
        Ok(())
      }
    }
  }
}
