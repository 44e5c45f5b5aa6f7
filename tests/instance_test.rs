mod common;

use std::time::Duration;

use anyhow::{ensure, Result};
use rtps_core::{
  dds::serialization::{key_hash_fn, Keyed, Sample, SpeedyCdrWithKey},
  policy::{Durability, History},
  structure::cache_change::ChangeKind,
  TypeSupport,
};
use speedy::{Readable, Writable};

use common::*;

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
struct Shape {
  id: u32,
  x: i32,
  y: i32,
}

impl Keyed for Shape {
  type K = u32;

  fn key(&self) -> u32 {
    self.id
  }
}

type ShapeSupport = SpeedyCdrWithKey<Shape>;

#[test]
fn keyed_samples_and_dispose_reach_reader() -> Result<()> {
  let mut d = Domain::new();
  let p1 = d.add_participant(1);
  let p2 = d.add_participant(2);
  let q = qos(reliable(), Durability::Volatile, History::KeepLast { depth: 1 });

  let wi = d.participants[p1].writer_ingredients("Square", q.clone(), true);
  let w = d.participants[p1].add_writer(wi, "ShapeType")?;
  let mut ri = d.participants[p2].reader_ingredients("Square", q, true);
  ri.key_hash = Some(key_hash_fn::<Shape, ShapeSupport>());
  let r = d.participants[p2].add_reader(ri, "ShapeType")?;
  ensure!(d.run_until(Duration::from_secs(5), |d| d.matched((p1, w), (p2, r))));

  let shapes = [
    Shape { id: 1, x: 10, y: 10 },
    Shape { id: 2, x: 20, y: 20 },
    Shape { id: 1, x: 11, y: 12 },
  ];
  for s in &shapes {
    let handle = ShapeSupport::key_hash(s).unwrap_or_default();
    d.participants[p1]
      .write(w.entity_id, ChangeKind::Alive, handle, ShapeSupport::serialize(s)?, None)
      .map_err(|e| anyhow::anyhow!("{}", e))?;
  }
  d.run_for(Duration::from_millis(200));

  let history = d.participants[p2].reader(r.entity_id).unwrap().history();
  let samples: Vec<Sample<Shape>> = history
    .lock()
    .map_err(|_| anyhow::anyhow!("poisoned"))?
    .take_all()
    .iter()
    .map(Sample::from_change::<ShapeSupport>)
    .collect::<rtps_core::Result<_>>()?;
  // KEEP_LAST(1) per instance: the first position of shape 1 is replaced.
  let mut values: Vec<Shape> = samples.into_iter().filter_map(|s| s.value).collect();
  values.sort_by_key(|s| s.id);
  assert_eq!(values, vec![shapes[2].clone(), shapes[1].clone()]);

  let handle = ShapeSupport::key_hash(&shapes[1]).unwrap_or_default();
  d.participants[p1]
    .write(
      w.entity_id,
      ChangeKind::NotAliveDisposed,
      handle,
      bytes::Bytes::new(),
      None,
    )
    .map_err(|e| anyhow::anyhow!("{}", e))?;
  d.run_for(Duration::from_millis(200));

  let changes = history
    .lock()
    .map_err(|_| anyhow::anyhow!("poisoned"))?
    .take_all();
  assert_eq!(changes.len(), 1);
  let disposed = Sample::<Shape>::from_change::<ShapeSupport>(&changes[0])?;
  assert_eq!(disposed.kind, ChangeKind::NotAliveDisposed);
  assert_eq!(disposed.instance_handle, handle);
  assert_eq!(disposed.value, None);
  assert_eq!(disposed.writer_guid, w);
  Ok(())
}
