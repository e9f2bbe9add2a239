#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use cassmap_db::{CassandraDriver, Mapper, MapperError, Value};
use common::{FakeCluster, page_views, users};

fn counter_mapper(cluster: &FakeCluster) -> Mapper<CassandraDriver> {
    Mapper::new(CassandraDriver::new(cluster.connection(&["db1"])), page_views())
}

#[test]
fn increments_and_decrements_accumulate() {
    let cluster = FakeCluster::new();
    let mut mapper = counter_mapper(&cluster);
    let mut page = mapper.load_or_new("home").unwrap();
    assert!(!page.exists());

    assert_eq!(mapper.increment(&mut page, "views", 1).unwrap(), 1);
    assert_eq!(mapper.decrement(&mut page, "views", 50).unwrap(), -49);
    assert_eq!(mapper.increment(&mut page, "views", 100).unwrap(), 51);
    assert!(page.exists());

    let stored = mapper.load("home").unwrap();
    assert_eq!(stored.get("views"), Some(&Value::Counter(51)));
    assert_eq!(stored.get("likes"), Some(&Value::Null));

    let updates: Vec<String> = cluster
        .executed()
        .into_iter()
        .filter(|q| q.starts_with("UPDATE"))
        .collect();
    assert_eq!(
        updates,
        vec![
            r#"UPDATE "page_views" SET "views" = "views" + ? WHERE "id" = ?"#.to_owned(),
            r#"UPDATE "page_views" SET "views" = "views" - ? WHERE "id" = ?"#.to_owned(),
            r#"UPDATE "page_views" SET "views" = "views" + ? WHERE "id" = ?"#.to_owned(),
        ]
    );
}

#[test]
fn counters_wrap_locally() {
    let cluster = FakeCluster::new();
    let mut mapper = counter_mapper(&cluster);
    let mut page = mapper.load_or_new("edge").unwrap();
    mapper.increment(&mut page, "likes", i64::MAX).unwrap();
    assert_eq!(mapper.increment(&mut page, "likes", 1).unwrap(), i64::MIN);
    mapper.reload(&mut page).unwrap();
    assert_eq!(page.get("likes"), Some(&Value::Counter(i64::MIN)));
}

#[test]
fn counter_entities_cannot_be_saved() {
    let cluster = FakeCluster::new();
    let mut mapper = counter_mapper(&cluster);
    let mut page = mapper.new_record();
    page.set("id", "home").unwrap();
    page.set("views", 3i64).unwrap();
    let err = mapper.save(&mut page).unwrap_err();
    assert!(matches!(err, MapperError::UnsupportedOperation(_)));
    assert_eq!(err.status(), 405);
    assert!(cluster.events().is_empty());
}

#[test]
fn non_counter_fields_cannot_be_incremented() {
    let cluster = FakeCluster::new();
    let mut mapper = Mapper::new(CassandraDriver::new(cluster.connection(&["db1"])), users());
    let mut user = mapper.new_record();
    user.set("id", "u1").unwrap();
    let err = mapper.increment(&mut user, "age", 1).unwrap_err();
    assert!(matches!(err, MapperError::UnsupportedOperation(_)));
    assert!(cluster.executed().is_empty());
}

#[test]
fn increment_needs_the_key() {
    let cluster = FakeCluster::new();
    let mut mapper = counter_mapper(&cluster);
    let mut page = mapper.new_record();
    let err = mapper.increment(&mut page, "views", 1).unwrap_err();
    assert!(matches!(err, MapperError::MissingKey(ref c) if c == "id"));
}
