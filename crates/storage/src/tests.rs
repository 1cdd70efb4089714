use super::*;
use tempfile::tempdir;

fn open_table(dir: &std::path::Path, record_size: u16, pool_pages: usize) -> Table {
    let pool = BufferPool::new(pool_pages);
    Table::open(dir.join("t.tbl"), record_size, pool).unwrap()
}

#[test]
fn data_page_capacity_matches_formula() {
    assert_eq!(
        DataPage::capacity(8),
        ((PAGE_SIZE - 4) * 8) / (8 * 8 + 1)
    );
}

#[test]
fn data_page_insert_read_delete_round_trip() {
    let mut buf = [0u8; PAGE_SIZE];
    DataPage::init(&mut buf, 8);

    let slot = DataPage::insert(&mut buf, &42u64.to_le_bytes()).unwrap();
    assert_eq!(DataPage::record_count(&buf), 1);
    assert!(DataPage::slot_occupied(&buf, slot as usize));
    assert_eq!(DataPage::read(&buf, slot).unwrap(), &42u64.to_le_bytes());

    assert!(DataPage::delete(&mut buf, slot));
    assert_eq!(DataPage::record_count(&buf), 0);
    assert!(DataPage::read(&buf, slot).is_none());
}

#[test]
fn data_page_insert_reuses_deleted_slot() {
    let mut buf = [0u8; PAGE_SIZE];
    DataPage::init(&mut buf, 8);
    let s0 = DataPage::insert(&mut buf, &1u64.to_le_bytes()).unwrap();
    let _s1 = DataPage::insert(&mut buf, &2u64.to_le_bytes()).unwrap();
    assert!(DataPage::delete(&mut buf, s0));
    let s2 = DataPage::insert(&mut buf, &3u64.to_le_bytes()).unwrap();
    assert_eq!(s2, s0);
}

#[test]
fn data_page_insert_fails_when_full() {
    let mut buf = [0u8; PAGE_SIZE];
    DataPage::init(&mut buf, 8);
    let capacity = DataPage::capacity(8);
    for i in 0..capacity {
        assert!(DataPage::insert(&mut buf, &(i as u64).to_le_bytes()).is_some());
    }
    assert!(DataPage::insert(&mut buf, &0u64.to_le_bytes()).is_none());
}

#[test]
fn directory_entry_round_trips() {
    let mut buf = [0u8; PAGE_SIZE];
    let entry = Entry {
        free_slots: 17,
        allocated: true,
        created: true,
    };
    DirectoryPage::set_entry(&mut buf, 3, entry);
    assert_eq!(DirectoryPage::get_entry(&buf, 3), entry);
    assert_eq!(DirectoryPage::get_entry(&buf, 0).allocated, false);
}

#[test]
fn table_insert_read_delete_and_slot_reuse() {
    let dir = tempdir().unwrap();
    let table = open_table(dir.path(), 8, 16);
    let capacity = table.capacity_per_page();

    let n = capacity * 3 + 5;
    let mut rids = Vec::with_capacity(n);
    for i in 0..n {
        let rid = table.insert(&(i as u64).to_le_bytes());
        assert!(rid.is_valid());
        rids.push(rid);
    }

    for (i, &rid) in rids.iter().enumerate() {
        let rec = table.read(rid).unwrap();
        assert_eq!(rec, (i as u64).to_le_bytes());
    }

    for (i, &rid) in rids.iter().enumerate() {
        if i % 2 == 0 {
            assert!(table.delete(rid));
        }
    }
    for (i, &rid) in rids.iter().enumerate() {
        if i % 2 == 0 {
            assert!(table.read(rid).is_none());
        } else {
            assert!(table.read(rid).is_some());
        }
    }

    // inserts keep filling the page the table is currently pointed at, so
    // the slots just freed on that page come back in ascending order.
    let last_page = rids.last().unwrap().page_num();
    let mut freed_slots: Vec<u32> = rids
        .iter()
        .enumerate()
        .filter(|(i, rid)| i % 2 == 0 && rid.page_num() == last_page)
        .map(|(_, rid)| rid.slot())
        .collect();
    freed_slots.sort_unstable();

    let mut reused_slots = Vec::with_capacity(freed_slots.len());
    for _ in 0..freed_slots.len() {
        let rid = table.insert(&999u64.to_le_bytes());
        assert!(rid.is_valid());
        assert_eq!(rid.page_num(), last_page);
        reused_slots.push(rid.slot());
        assert_eq!(table.read(rid).unwrap(), 999u64.to_le_bytes());
    }
    assert_eq!(reused_slots, freed_slots);
}

#[test]
fn table_update_overwrites_in_place() {
    let dir = tempdir().unwrap();
    let table = open_table(dir.path(), 8, 8);
    let rid = table.insert(&1u64.to_le_bytes());
    assert!(table.update(rid, &99u64.to_le_bytes()));
    assert_eq!(table.read(rid).unwrap(), 99u64.to_le_bytes());
}

#[test]
fn table_update_nonexistent_rid_fails() {
    let dir = tempdir().unwrap();
    let table = open_table(dir.path(), 8, 8);
    let bogus = Rid::new(table.file.data_file_id(), 99, 0);
    assert!(!table.update(bogus, &1u64.to_le_bytes()));
    assert!(!table.delete(bogus));
    assert!(table.read(bogus).is_none());
}

#[test]
fn table_allocates_new_page_when_current_is_full() {
    let dir = tempdir().unwrap();
    let table = open_table(dir.path(), 8, 8);
    let capacity = table.capacity_per_page();

    let mut page_nums = Vec::new();
    for i in 0..(capacity + 1) {
        let rid = table.insert(&(i as u64).to_le_bytes());
        page_nums.push(rid.page_num());
    }
    assert_ne!(page_nums[0], page_nums[capacity]);
}

#[test]
fn deallocated_page_is_recycled_by_scavenge() {
    let dir = tempdir().unwrap();
    let pool = BufferPool::new(8);
    let file = File::open(dir.path().join("t.tbl"), 8, pool.clone()).unwrap();

    let p0 = file.allocate_page();
    let p1 = file.allocate_page();
    assert!(file.deallocate_page(p0));
    assert!(!file.page_exists(p0));

    let scavenged = file.scavenge_page();
    assert_eq!(scavenged, p0);
    assert!(file.page_exists(p0));
    assert_ne!(p1, p0);
}

#[test]
fn page_exists_false_for_never_allocated_page() {
    let dir = tempdir().unwrap();
    let pool = BufferPool::new(4);
    let file = File::open(dir.path().join("t.tbl"), 8, pool).unwrap();
    assert!(!file.page_exists(PageId::new(file.data_file_id(), 9000)));
}
