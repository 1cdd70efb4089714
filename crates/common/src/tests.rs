use super::*;
use std::io;

#[test]
fn page_id_round_trips_file_and_page_num() {
    let pid = PageId::new(7, 123);
    assert_eq!(pid.file_id(), 7);
    assert_eq!(pid.page_num(), 123);
    assert!(pid.is_valid());
}

#[test]
fn page_id_invalid_is_all_ones() {
    assert_eq!(PageId::INVALID.0, u64::MAX);
    assert!(!PageId::INVALID.is_valid());
    assert!(!PageId::default().is_valid());
}

#[test]
fn rid_round_trips_slot_and_page_id() {
    let rid = Rid::new(3, 42, 17);
    assert_eq!(rid.file_id(), 3);
    assert_eq!(rid.page_num(), 42);
    assert_eq!(rid.slot(), 17);
    assert_eq!(rid.page_id(), PageId::new(3, 42));
}

#[test]
fn rid_from_page_zeroes_the_slot() {
    let pid = PageId::new(1, 0);
    let rid = Rid::from_page(pid, 9);
    assert_eq!(rid.page_id(), pid);
    assert_eq!(rid.slot(), 9);
}

#[test]
fn rid_invalid_is_all_ones() {
    assert_eq!(Rid::INVALID.0, u64::MAX);
    assert!(!Rid::INVALID.is_valid());
}

#[test]
fn engine_config_defaults_are_sane() {
    let cfg = EngineConfig::default();
    assert_eq!(cfg.buffer_pool_pages, 256);
    assert_eq!(cfg.log_buffer_kb, 64);
    assert_eq!(cfg.log_buffer_bytes(), 64 * 1024);
    assert_eq!(cfg.deadlock_policy, DeadlockPolicy::WaitDie);
}

#[test]
fn engine_config_builder_overrides_defaults() {
    let cfg = EngineConfig::builder()
        .buffer_pool_pages(16)
        .log_buffer_kb(4)
        .deadlock_policy(DeadlockPolicy::NoWait)
        .build();
    assert_eq!(cfg.buffer_pool_pages, 16);
    assert_eq!(cfg.deadlock_policy, DeadlockPolicy::NoWait);
}

#[test]
fn db_error_formats_cleanly() {
    let err = DbError::Storage("corruption".into());
    assert!(format!("{err}").contains("storage"));
}

#[test]
fn io_error_converts() {
    let e = io::Error::other("oops");
    let db_err: DbError = e.into();
    assert!(matches!(db_err, DbError::Io(_)));
}
