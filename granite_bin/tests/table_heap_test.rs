//! Table heap behavior over many pages: insert/iterate bijection,
//! updates under the same RowId, and deletes.

use std::collections::HashMap;
use std::sync::Arc;

use rand::prelude::*;
use substrate::disk::DiskManager;
use substrate::heap::TableHeap;
use substrate::record::{Column, Field, Row, Schema, TypeId};
use substrate::{BufferPoolManager, DEFAULT_BUFFER_POOL_SIZE};
use tempfile::tempdir;

fn sample_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Column::new_scalar("id", TypeId::Int, 0, false, false),
        Column::new_char("name", 64, 1, true, false),
        Column::new_scalar("account", TypeId::Float, 2, true, false),
    ]))
}

fn open_heap(path: &std::path::Path) -> (Arc<BufferPoolManager>, TableHeap) {
    let disk = DiskManager::open(path).unwrap();
    let bpm = Arc::new(BufferPoolManager::new(DEFAULT_BUFFER_POOL_SIZE, disk));
    let heap = TableHeap::create(Arc::clone(&bpm), sample_schema()).unwrap();
    (bpm, heap)
}

fn random_fields(rng: &mut StdRng, id: i32) -> Vec<Field> {
    let len = rng.gen_range(0..=64);
    let name: String = (0..len).map(|_| rng.gen_range('a'..='z')).collect();
    vec![
        Field::Int(id),
        Field::Char(name),
        Field::Float(rng.gen_range(-999.0..999.0)),
    ]
}

#[test]
fn ten_thousand_rows_round_trip_through_the_heap() {
    let dir = tempdir().unwrap();
    let (bpm, heap) = open_heap(&dir.path().join("t.db"));
    let mut rng = StdRng::seed_from_u64(0x8EAF);
    let row_count = 10_000;
    let mut stored: HashMap<u64, Vec<Field>> = HashMap::new();
    for id in 0..row_count {
        let fields = random_fields(&mut rng, id);
        let mut row = Row::new(fields.clone());
        heap.insert_tuple(&mut row).unwrap();
        let packed = row.rid().to_u64();
        assert!(
            stored.insert(packed, fields).is_none(),
            "RowId handed out twice"
        );
    }
    assert_eq!(stored.len(), row_count as usize);

    // Point reads return exactly what went in.
    for (&packed, fields) in &stored {
        let rid = substrate::RowId::from_u64(packed);
        let row = heap.get_tuple(rid).unwrap().unwrap();
        assert_eq!(row.fields(), &fields[..]);
    }

    // Full iteration returns the same multiset of rows.
    let mut seen = 0;
    for row in heap.iter() {
        let expected = stored.get(&row.rid().to_u64()).expect("unknown RowId");
        assert_eq!(row.fields(), &expected[..]);
        seen += 1;
    }
    assert_eq!(seen, row_count);
    assert!(bpm.check_all_unpinned());
}

#[test]
fn smaller_update_stays_in_place_under_the_same_rid() {
    let dir = tempdir().unwrap();
    let (bpm, heap) = open_heap(&dir.path().join("t.db"));
    let mut row = Row::new(vec![
        Field::Int(1),
        Field::Char("a long enough initial payload".to_string()),
        Field::Float(1.5),
    ]);
    heap.insert_tuple(&mut row).unwrap();
    let rid = row.rid();

    let smaller = Row::new(vec![
        Field::Int(1),
        Field::Char("short".to_string()),
        Field::Float(1.5),
    ]);
    let new_rid = heap.update_tuple(&smaller, rid).unwrap();
    assert_eq!(new_rid, rid);
    let back = heap.get_tuple(rid).unwrap().unwrap();
    assert_eq!(back.field(1), &Field::Char("short".to_string()));
    assert!(bpm.check_all_unpinned());
}

#[test]
fn oversized_update_relocates_and_reports_the_new_rid() {
    let dir = tempdir().unwrap();
    let (bpm, heap) = open_heap(&dir.path().join("t.db"));
    // Fill the first page almost completely so growth must relocate.
    let mut first = Row::new(vec![
        Field::Int(0),
        Field::Char("x".repeat(10)),
        Field::Float(0.0),
    ]);
    heap.insert_tuple(&mut first).unwrap();
    let mut filler_id = 1;
    loop {
        let mut row = Row::new(vec![
            Field::Int(filler_id),
            Field::Char("y".repeat(60)),
            Field::Float(0.0),
        ]);
        heap.insert_tuple(&mut row).unwrap();
        if row.rid().page_id() != first.rid().page_id() {
            break;
        }
        filler_id += 1;
    }

    let grown = Row::new(vec![
        Field::Int(0),
        Field::Char("z".repeat(64)),
        Field::Float(0.0),
    ]);
    let new_rid = heap.update_tuple(&grown, first.rid()).unwrap();
    assert_ne!(new_rid, first.rid());
    assert!(heap.get_tuple(first.rid()).unwrap().is_none());
    let back = heap.get_tuple(new_rid).unwrap().unwrap();
    assert_eq!(back.field(1), &Field::Char("z".repeat(64)));
    assert!(bpm.check_all_unpinned());
}

#[test]
fn iteration_equals_inserts_minus_applied_deletes() {
    let dir = tempdir().unwrap();
    let (bpm, heap) = open_heap(&dir.path().join("t.db"));
    let mut rng = StdRng::seed_from_u64(0xDE1E7E);
    let mut live: HashMap<u64, Vec<Field>> = HashMap::new();
    let mut rids = Vec::new();
    for id in 0..2_000 {
        let fields = random_fields(&mut rng, id);
        let mut row = Row::new(fields.clone());
        heap.insert_tuple(&mut row).unwrap();
        live.insert(row.rid().to_u64(), fields);
        rids.push(row.rid());
    }
    rids.shuffle(&mut rng);
    for rid in rids.iter().take(700) {
        heap.apply_delete(*rid).unwrap();
        live.remove(&rid.to_u64());
    }
    let mut seen = 0;
    for row in heap.iter() {
        assert!(live.contains_key(&row.rid().to_u64()));
        seen += 1;
    }
    assert_eq!(seen, live.len());
    assert!(bpm.check_all_unpinned());
}
