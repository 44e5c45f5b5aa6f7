mod common;

use std::{
  cell::{Cell, RefCell},
  rc::Rc,
  time::Duration,
};

use anyhow::{ensure, Result};
use bytes::Bytes;
use rtps_core::{
  messages::submessages::submessage::{ReaderSubmessage, WriterSubmessage},
  policy::{Durability, History, Reliability, ResourceLimits},
  rtps::{
    reader::ReaderTimes, rtps_reader_proxy::ChangeForReaderStatus, writer::WriterTimes, Message,
    SubmessageBody,
  },
  structure::{cache_change::ChangeKind, instance_handle::InstanceHandle},
  ParticipantConfig, SequenceNumber, WriteError,
};
use speedy::{Endianness, Writable};

use common::*;

// User DATA submessages carried by `msg`, by writer sequence number.
fn user_data_sns(msg: &Message) -> Vec<i64> {
  msg
    .submessages
    .iter()
    .filter_map(|s| match &s.body {
      SubmessageBody::Writer(WriterSubmessage::Data(d, _))
        if d.writer_id.kind().is_user_defined() =>
      {
        Some(i64::from(d.writer_sn))
      }
      _ => None,
    })
    .collect()
}

// ACKNACKs of user readers that request at least one change.
fn is_user_nack(msg: &Message) -> bool {
  msg.submessages.iter().any(|s| match &s.body {
    SubmessageBody::Reader(ReaderSubmessage::AckNack(an, _)) => {
      an.reader_id.kind().is_user_defined() && !an.reader_sn_state.is_empty()
    }
    _ => false,
  })
}

fn user_heartbeats(msg: &Message) -> usize {
  msg
    .submessages
    .iter()
    .filter(|s| match &s.body {
      SubmessageBody::Writer(WriterSubmessage::Heartbeat(hb, _)) => {
        hb.writer_id.kind().is_user_defined()
      }
      _ => false,
    })
    .count()
}

// User DATA_FRAGs carried by `msg`, as (sequence number, fragment number).
fn user_data_frags(msg: &Message) -> Vec<(i64, u32)> {
  msg
    .submessages
    .iter()
    .filter_map(|s| match &s.body {
      SubmessageBody::Writer(WriterSubmessage::DataFrag(df, _))
        if df.writer_id.kind().is_user_defined() =>
      {
        Some((i64::from(df.writer_sn), u32::from(df.fragment_starting_num)))
      }
      _ => None,
    })
    .collect()
}

fn is_user_nack_frag(msg: &Message) -> bool {
  msg.submessages.iter().any(|s| match &s.body {
    SubmessageBody::Reader(ReaderSubmessage::NackFrag(nf, _)) => {
      nf.reader_id.kind().is_user_defined()
    }
    _ => false,
  })
}

fn large_payload(len: usize) -> Bytes {
  let mut v = vec![0x00, 0x01, 0x00, 0x00];
  v.extend((0..len).map(|i| (i % 251) as u8));
  Bytes::from(v)
}

fn small_mtu_participant(d: &mut Domain, id: u8) -> usize {
  d.add_participant_with(
    id,
    ParticipantConfig {
      mtu: 1400,
      ..ParticipantConfig::default()
    },
    None,
  )
}

fn taken_payloads(d: &Domain, p: usize, r: rtps_core::GUID) -> Vec<Bytes> {
  let reader = d.participants[p].reader(r.entity_id).unwrap();
  let history = reader.history();
  let mut history = history.lock().unwrap();
  history.take_all().into_iter().map(|c| c.data_value).collect()
}

#[test]
fn large_sample_survives_a_lost_fragment() -> Result<()> {
  let mut d = Domain::new();
  let p1 = small_mtu_participant(&mut d, 1);
  let p2 = small_mtu_participant(&mut d, 2);
  let q = qos(reliable(), Durability::Volatile, History::KeepLast { depth: 10 });
  let w = d.add_writer(p1, "Fragments", q.clone());
  let r = d.add_reader(p2, "Fragments", q);
  ensure!(d.run_until(Duration::from_secs(5), |d| d.matched((p1, w), (p2, r))));

  let sent: Rc<RefCell<Vec<(i64, u32)>>> = Rc::new(RefCell::new(Vec::new()));
  let nack_frags = Rc::new(Cell::new(0));
  let (log, nf) = (sent.clone(), nack_frags.clone());
  d.net.set_drop_filter(move |_, msg| {
    if is_user_nack_frag(msg) {
      nf.set(nf.get() + 1);
    }
    let frags = user_data_frags(msg);
    let first_of_2 = frags.contains(&(1, 2)) && !log.borrow().contains(&(1, 2));
    log.borrow_mut().extend(frags);
    first_of_2
  });
  let sample = large_payload(5000);
  d.participants[p1]
    .write(
      w.entity_id,
      ChangeKind::Alive,
      InstanceHandle::default(),
      sample.clone(),
      None,
    )
    .unwrap_or_else(|e| panic!("write: {}", e));
  d.deliver();
  assert!(taken_payloads(&d, p2, r).is_empty());

  ensure!(d.run_until(Duration::from_secs(10), |d| {
    d.participants[p1]
      .writer(w.entity_id)
      .unwrap()
      .is_acked_by_all(SequenceNumber::new(1))
  }));
  assert_eq!(taken_payloads(&d, p2, r), vec![sample]);
  assert!(nack_frags.get() >= 1);
  // Only the lost fragment was sent again.
  let sent = sent.borrow();
  assert_eq!(sent.iter().filter(|f| **f == (1, 1)).count(), 1);
  assert!(sent.iter().filter(|f| **f == (1, 2)).count() >= 2);
  Ok(())
}

#[test]
fn best_effort_large_sample_is_reassembled() -> Result<()> {
  let mut d = Domain::new();
  let p1 = small_mtu_participant(&mut d, 1);
  let p2 = small_mtu_participant(&mut d, 2);
  let q = qos(
    Reliability::BestEffort,
    Durability::Volatile,
    History::KeepLast { depth: 10 },
  );
  let w = d.add_writer(p1, "FragmentsBE", q.clone());
  let r = d.add_reader(p2, "FragmentsBE", q);
  ensure!(d.run_until(Duration::from_secs(5), |d| d.matched((p1, w), (p2, r))));

  let sample = large_payload(3000);
  d.participants[p1]
    .write(
      w.entity_id,
      ChangeKind::Alive,
      InstanceHandle::default(),
      sample.clone(),
      None,
    )
    .unwrap_or_else(|e| panic!("write: {}", e));
  d.deliver();
  assert_eq!(taken_payloads(&d, p2, r), vec![sample]);
  Ok(())
}

#[test]
fn keep_last_one_writer_best_effort_reader_live() -> Result<()> {
  let mut d = Domain::new();
  let p1 = d.add_participant(1);
  let p2 = d.add_participant(2);
  let q = qos(
    Reliability::BestEffort,
    Durability::Volatile,
    History::KeepLast { depth: 1 },
  );
  let w = d.add_writer(p1, "Scenario1", q.clone());
  let r = d.add_reader(p2, "Scenario1", q);
  ensure!(d.run_until(Duration::from_secs(5), |d| d.matched((p1, w), (p2, r))));

  for n in 1..=3 {
    d.write(p1, w, n);
  }
  d.run_for(Duration::from_millis(200));

  assert_eq!(d.take(p2, r), vec![(3, 3)]);
  let reader = d.participants[p2].reader(r.entity_id).unwrap();
  assert_eq!(reader.status_counters().sample_lost.count(), 0);
  let writer = d.participants[p1].writer(w.entity_id).unwrap();
  assert_eq!(writer.history().len(), 1);
  Ok(())
}

#[test]
fn late_joining_reader_gets_only_the_kept_sample() -> Result<()> {
  let mut d = Domain::new();
  let p1 = d.add_participant(1);
  let p2 = d.add_participant(2);
  let w = d.add_writer(
    p1,
    "Scenario1",
    qos(reliable(), Durability::TransientLocal, History::KeepLast { depth: 1 }),
  );
  for n in 1..=3 {
    d.write(p1, w, n);
  }

  let r = d.add_reader(
    p2,
    "Scenario1",
    qos(
      Reliability::BestEffort,
      Durability::TransientLocal,
      History::KeepLast { depth: 10 },
    ),
  );
  ensure!(d.run_until(Duration::from_secs(5), |d| d.matched((p1, w), (p2, r))));
  d.run_for(Duration::from_millis(500));

  assert_eq!(d.take(p2, r), vec![(3, 3)]);
  let reader = d.participants[p2].reader(r.entity_id).unwrap();
  assert_eq!(reader.status_counters().sample_lost.count(), 0);
  Ok(())
}

#[test]
fn dropped_data_is_repaired_after_acknack() -> Result<()> {
  let mut d = Domain::new();
  let p1 = d.add_participant(1);
  let p2 = d.add_participant(2);
  let q = qos(reliable(), Durability::Volatile, History::KeepLast { depth: 10 });
  let w = d.add_writer(p1, "Scenario2", q.clone());
  let r = d.add_reader(p2, "Scenario2", q);
  ensure!(d.run_until(Duration::from_secs(5), |d| d.matched((p1, w), (p2, r))));

  let dropped = Rc::new(Cell::new(0));
  let counter = dropped.clone();
  d.net.set_drop_filter(move |_, msg| {
    if counter.get() == 0 && user_data_sns(msg).contains(&2) {
      counter.set(1);
      true
    } else {
      false
    }
  });
  for n in 1..=5 {
    d.write(p1, w, n);
  }
  d.deliver();
  assert_eq!(dropped.get(), 1);
  assert_eq!(d.take(p2, r), vec![(1, 1)]);

  // The next heartbeat reveals the hole, the ACKNACK requests it.
  let writer_acked_all = |d: &Domain| {
    let writer = d.participants[p1].writer(w.entity_id).unwrap();
    let proxy = writer.reader_proxy(r).unwrap();
    (1..=5).all(|sn| {
      proxy.status_of(SequenceNumber::new(sn)) == Some(ChangeForReaderStatus::Acknowledged)
    })
  };
  ensure!(d.run_until(Duration::from_secs(10), writer_acked_all));
  assert_eq!(
    d.take(p2, r),
    vec![(2, 2), (3, 3), (4, 4), (5, 5)]
  );
  Ok(())
}

#[test]
fn reliable_reader_never_reorders_over_lossy_channel() -> Result<()> {
  let mut d = Domain::new();
  let p1 = d.add_participant(1);
  let p2 = d.add_participant(2);
  let q = qos(reliable(), Durability::Volatile, History::KeepAll);
  let w = d.add_writer(p1, "Lossy", q.clone());
  let r = d.add_reader(p2, "Lossy", q);
  ensure!(d.run_until(Duration::from_secs(5), |d| d.matched((p1, w), (p2, r))));

  // Every third datagram with user data is lost.
  let seen = Rc::new(Cell::new(0u32));
  let s = seen.clone();
  d.net.set_drop_filter(move |_, msg| {
    if user_data_sns(msg).is_empty() {
      return false;
    }
    s.set(s.get() + 1);
    s.get() % 3 == 0
  });

  let mut received = Vec::new();
  for n in 1..=20 {
    d.write(p1, w, n);
    d.step();
    received.extend(d.take(p2, r));
  }
  ensure!(d.run_until(Duration::from_secs(30), |d| {
    let reader = d.participants[p2].reader(r.entity_id).unwrap();
    let history = reader.history();
    let n = history.lock().map(|h| h.len()).unwrap_or(0);
    received.len() + n >= 20
  }));
  received.extend(d.take(p2, r));

  let sns: Vec<i64> = received.iter().map(|(sn, _)| *sn).collect();
  assert_eq!(sns, (1..=20).collect::<Vec<i64>>());
  assert!(d.net.dropped_count() > 0);
  Ok(())
}

#[test]
fn keep_all_writer_blocks_until_reader_acknowledges() -> Result<()> {
  let mut d = Domain::new();
  let p1 = d.add_participant(1);
  let p2 = d.add_participant(2);
  let q = rtps_core::QosPolicyBuilder::new()
    .reliability(reliable())
    .history(History::KeepAll)
    .resource_limits(ResourceLimits {
      max_samples: 2,
      max_instances: 1,
      max_samples_per_instance: 2,
    })
    .build();
  let w = d.add_writer(p1, "Blocking", q.clone());
  let r = d.add_reader(p2, "Blocking", q);
  ensure!(d.run_until(Duration::from_secs(5), |d| d.matched((p1, w), (p2, r))));

  d.net.set_drop_filter(|_, msg| !user_data_sns(msg).is_empty());
  d.write(p1, w, 1);
  d.write(p1, w, 2);
  d.deliver();
  let third = d.participants[p1].write(
    w.entity_id,
    ChangeKind::Alive,
    InstanceHandle::default(),
    payload(3),
    None,
  );
  match third {
    Err(WriteError::WouldBlock { data }) => assert_eq!(data, payload(3)),
    other => panic!("expected WouldBlock, got {:?}", other),
  }
  assert_eq!(
    d.participants[p1]
      .writer(w.entity_id)
      .unwrap()
      .history()
      .len(),
    2
  );

  d.net.clear_drop_filter();
  ensure!(d.run_until(Duration::from_secs(10), |d| {
    d.participants[p1]
      .writer(w.entity_id)
      .unwrap()
      .is_acked_by_all(SequenceNumber::new(2))
  }));
  assert_eq!(d.write(p1, w, 3), SequenceNumber::new(3));
  Ok(())
}

#[test]
fn duplicate_acknack_does_not_trigger_another_repair() -> Result<()> {
  let mut d = Domain::new();
  let p1 = d.add_participant(1);
  let p2 = d.add_participant(2);
  let q = qos(reliable(), Durability::Volatile, History::KeepLast { depth: 10 });
  let w = d.add_writer(p1, "Idempotence", q.clone());
  let r = d.add_reader(p2, "Idempotence", q);
  ensure!(d.run_until(Duration::from_secs(5), |d| d.matched((p1, w), (p2, r))));

  let sends_of_2 = Rc::new(Cell::new(0));
  let nacks: Rc<RefCell<Vec<Message>>> = Rc::new(RefCell::new(Vec::new()));
  let (count, seen) = (sends_of_2.clone(), nacks.clone());
  d.net.set_drop_filter(move |_, msg| {
    if is_user_nack(msg) {
      seen.borrow_mut().push(msg.clone());
    }
    if user_data_sns(msg).contains(&2) {
      count.set(count.get() + 1);
      return count.get() == 1;
    }
    false
  });
  for n in 1..=5 {
    d.write(p1, w, n);
  }
  ensure!(d.run_until(Duration::from_secs(10), |d| {
    d.participants[p1]
      .writer(w.entity_id)
      .unwrap()
      .is_acked_by_all(SequenceNumber::new(5))
  }));
  assert_eq!(sends_of_2.get(), 2);
  let nack = nacks
    .borrow()
    .first()
    .cloned()
    .unwrap_or_else(|| panic!("no ACKNACK requested the lost change"));

  // The same ACKNACK again, twice.
  let bytes = Bytes::from(nack.write_to_vec_with_ctx(Endianness::LittleEndian)?);
  d.participants[p1].handle_received_packet(&bytes);
  d.participants[p1].handle_received_packet(&bytes);
  d.run_for(Duration::from_millis(500));
  assert_eq!(sends_of_2.get(), 2);
  assert_eq!(
    d.take(p2, r),
    vec![(1, 1), (2, 2), (3, 3), (4, 4), (5, 5)]
  );
  Ok(())
}

#[test]
fn reader_suppresses_heartbeats_inside_the_window() -> Result<()> {
  let mut d = Domain::new();
  let p1 = d.add_participant_with(
    1,
    ParticipantConfig {
      writer_times: WriterTimes {
        heartbeat_period: Duration::from_millis(100),
        ..WriterTimes::default()
      },
      ..ParticipantConfig::default()
    },
    None,
  );
  let p2 = d.add_participant_with(
    2,
    ParticipantConfig {
      reader_times: ReaderTimes {
        heartbeat_suppression_duration: Duration::from_secs(1),
        ..ReaderTimes::default()
      },
      ..ParticipantConfig::default()
    },
    None,
  );
  let q = qos(reliable(), Durability::Volatile, History::KeepLast { depth: 10 });
  let w = d.add_writer(p1, "Suppression", q.clone());
  let r = d.add_reader(p2, "Suppression", q);
  ensure!(d.run_until(Duration::from_secs(5), |d| d.matched((p1, w), (p2, r))));
  d.run_for(Duration::from_secs(2));

  // User data never arrives, so every accepted heartbeat is answered with a
  // NACK.
  let heartbeats = Rc::new(Cell::new(0));
  let nacks = Rc::new(Cell::new(0));
  let (hb, nk) = (heartbeats.clone(), nacks.clone());
  d.net.set_drop_filter(move |_, msg| {
    hb.set(hb.get() + user_heartbeats(msg));
    if is_user_nack(msg) {
      nk.set(nk.get() + 1);
    }
    !user_data_sns(msg).is_empty()
  });
  d.write(p1, w, 1);
  d.run_for(Duration::from_millis(2500));

  assert!(heartbeats.get() >= 15, "{} heartbeats", heartbeats.get());
  assert!(
    (1..=3).contains(&nacks.get()),
    "{} NACKs for {} heartbeats",
    nacks.get(),
    heartbeats.get()
  );
  assert!(d.take(p2, r).is_empty());
  Ok(())
}
