use enumflags2::BitFlags;
use speedy::{Context, Writable, Writer};

use crate::{
  messages::submessages::{
    ack_nack::AckNack,
    data::Data,
    data_frag::DataFrag,
    gap::Gap,
    heartbeat::Heartbeat,
    heartbeat_frag::HeartbeatFrag,
    info_destination::InfoDestination,
    info_source::InfoSource,
    info_timestamp::InfoTimestamp,
    nack_frag::NackFrag,
    submessage_flag::{
      ACKNACK_Flags, DATAFRAG_Flags, DATA_Flags, GAP_Flags, HEARTBEATFRAG_Flags, HEARTBEAT_Flags,
      INFODESTINATION_Flags, INFOSOURCE_Flags, INFOTIMESTAMP_Flags, NACKFRAG_Flags,
    },
  },
  structure::guid::EntityId,
};

/// Submessages sent by a Writer to Readers.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum WriterSubmessage {
  Data(Data, BitFlags<DATA_Flags>),
  Gap(Gap, BitFlags<GAP_Flags>),
  Heartbeat(Heartbeat, BitFlags<HEARTBEAT_Flags>),
  DataFrag(DataFrag, BitFlags<DATAFRAG_Flags>),
  HeartbeatFrag(HeartbeatFrag, BitFlags<HEARTBEATFRAG_Flags>),
}

/// Submessages sent by a Reader to Writers.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ReaderSubmessage {
  AckNack(AckNack, BitFlags<ACKNACK_Flags>),
  NackFrag(NackFrag, BitFlags<NACKFRAG_Flags>),
}

impl WriterSubmessage {
  pub fn sender_entity_id(&self) -> EntityId {
    match self {
      Self::Data(d, _) => d.writer_id,
      Self::Gap(g, _) => g.writer_id,
      Self::Heartbeat(h, _) => h.writer_id,
      Self::DataFrag(d, _) => d.writer_id,
      Self::HeartbeatFrag(h, _) => h.writer_id,
    }
  }

  pub fn receiver_entity_id(&self) -> EntityId {
    match self {
      Self::Data(d, _) => d.reader_id,
      Self::Gap(g, _) => g.reader_id,
      Self::Heartbeat(h, _) => h.reader_id,
      Self::DataFrag(d, _) => d.reader_id,
      Self::HeartbeatFrag(h, _) => h.reader_id,
    }
  }
}

impl ReaderSubmessage {
  pub fn sender_entity_id(&self) -> EntityId {
    match self {
      Self::AckNack(a, _) => a.reader_id,
      Self::NackFrag(n, _) => n.reader_id,
    }
  }

  pub fn receiver_entity_id(&self) -> EntityId {
    match self {
      Self::AckNack(a, _) => a.writer_id,
      Self::NackFrag(n, _) => n.writer_id,
    }
  }
}

/// Submessages that modify the state of the MessageReceiver.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum InterpreterSubmessage {
  InfoSource(InfoSource, BitFlags<INFOSOURCE_Flags>),
  InfoDestination(InfoDestination, BitFlags<INFODESTINATION_Flags>),
  InfoTimestamp(InfoTimestamp, BitFlags<INFOTIMESTAMP_Flags>),
}

impl<C: Context> Writable<C> for WriterSubmessage {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    match self {
      Self::Data(s, _) => writer.write_value(s),
      Self::Gap(s, _) => writer.write_value(s),
      Self::Heartbeat(s, _) => writer.write_value(s),
      Self::DataFrag(s, _) => writer.write_value(s),
      Self::HeartbeatFrag(s, _) => writer.write_value(s),
    }
  }
}

impl<C: Context> Writable<C> for ReaderSubmessage {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    match self {
      Self::AckNack(s, _) => writer.write_value(s),
      Self::NackFrag(s, _) => writer.write_value(s),
    }
  }
}

impl<C: Context> Writable<C> for InterpreterSubmessage {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    match self {
      Self::InfoSource(s, _) => writer.write_value(s),
      Self::InfoDestination(s, _) => writer.write_value(s),
      Self::InfoTimestamp(s, _) => match &s.timestamp {
        Some(ts) => writer.write_value(ts),
        None => Ok(()),
      },
    }
  }
}
