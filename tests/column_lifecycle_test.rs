//! End-to-end test: build a column through the pool, sort it, index it,
//! commit it to disk, then reload it in a fresh pool.

use gdk_columns::atoms::AtomRegistry;
use gdk_columns::column::{ops, Column, Persistence};
use gdk_columns::config::{role, GdkConfig};
use gdk_columns::hash::HashIndex;
use gdk_columns::heap::Heap;
use gdk_columns::pool::directory::ColumnRecord;
use gdk_columns::pool::{commit, Pool};
use gdk_columns::sort::{self, SortRequest};

fn tmp_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("gdk_lifecycle_{}", std::process::id()));
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn create_sort_index_commit_and_reload() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let dir = tmp_dir();
    let config = GdkConfig::single_farm(&dir);
    let farm = config.farm_for_role(role::PERSISTENT).unwrap().clone();
    let atoms = AtomRegistry::new();
    let atom = atoms.lookup_by_name("int").unwrap();

    let values: [i32; 6] = [5, 1, 4, 1, 9, 2];
    let heap = Heap::alloc(&farm.directory, "5.tail", 64, 1 << 20, farm.id).unwrap();
    let mut col = Column::new(0, atom, 4, false, values.len(), 0, heap.clone(), None, Persistence::Persistent);
    for v in &values {
        ops::append_fixed(&mut col, &atoms, &v.to_le_bytes(), 1 << 20).unwrap();
    }

    // Sort and persist an order index alongside the column.
    let order_path = farm.directory.join("bat").join("5.orderidx");
    let req = SortRequest { reverse: false, nilslast: false, stable: true };
    let order_index = sort::sort_and_persist(&col, &atoms, req, &order_path).unwrap();
    assert_eq!(order_index.order.len(), values.len());
    let sorted_values: Vec<i32> = order_index
        .order
        .iter()
        .map(|&row| i32::from_le_bytes(col.slot_bytes(row as usize).unwrap().try_into().unwrap()))
        .collect();
    let mut expected = values.to_vec();
    expected.sort();
    assert_eq!(sorted_values, expected);

    // Build a hash index over the same column.
    let sample: Vec<u64> = values.iter().map(|v| *v as u64).collect();
    let mut hash = HashIndex::new(values.len(), &sample);
    for (row, v) in values.iter().enumerate() {
        hash.insert(row as u32, *v as u64);
    }
    let hits: Vec<u32> = hash.probe(1).collect();
    assert_eq!(hits.len(), 2); // two rows hold the value 1

    // Register the column with the pool and commit it to disk.
    let record = ColumnRecord {
        id: 0,
        atom_name: "int".into(),
        width: col.width,
        hseqbase: col.hseqbase,
        tseqbase: col.tseqbase,
        count: col.count,
        persistence: Persistence::Persistent,
        heap_file: "5.tail".into(),
        vheap_file: None,
    };
    let pool = Pool::new(config.clone());
    let id = pool.create(col, record);
    let directory = pool.snapshot_directory();
    commit::commit(&farm.directory, &directory, &[("5.tail", &heap)]).unwrap();
    pool.unfix(id).unwrap();

    // Reload from scratch through a brand-new pool, simulating a
    // fresh process reading back the committed directory.
    let reloaded_directory = gdk_columns::pool::directory::Directory::read(&farm.directory.join("BBP.dir")).unwrap();
    assert_eq!(reloaded_directory.records.len(), 1);
    let fresh_pool = Pool::new(config);
    let fresh_atoms = AtomRegistry::new();
    let placeholder_heap = Heap::alloc(&farm.directory, "placeholder", 0, 1 << 20, farm.id).unwrap();
    let fresh_id = fresh_pool.create(
        Column::new(
            0,
            fresh_atoms.lookup_by_name("int").unwrap(),
            0,
            false,
            0,
            0,
            placeholder_heap,
            None,
            Persistence::Persistent,
        ),
        reloaded_directory.records[0].clone(),
    );
    fresh_pool.unfix(fresh_id).unwrap();
    fresh_pool.unload(fresh_id).unwrap();
    fresh_pool.fix(fresh_id, &fresh_atoms).unwrap();
    let reloaded_count = fresh_pool.with_column(fresh_id, |c| c.count).unwrap();
    assert_eq!(reloaded_count, values.len());

    std::fs::remove_dir_all(dir).ok();
}
