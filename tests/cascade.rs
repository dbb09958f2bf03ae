//! Link maintenance: renames cascading into child categories, orphan
//! purges on erase, and the key-index fast path agreeing with a scan.

mod helpers;

use cifkit::{Condition, key};
use helpers::{LINKED_FILE, parse, parse_validated};

#[test]
fn parent_key_rename_cascades_to_children() {
    let mut file = parse_validated(LINKED_FILE);
    let block = file.get_mut("test").unwrap();
    let row = block.get("entity").unwrap().find1(key("id").eq("1")).unwrap();

    block.update_value("entity", row, "id", "2").unwrap();

    assert_eq!(block.get("entity").unwrap().first().unwrap().text("id"), Some("2"));
    let poly = block.get("entity_poly").unwrap().first().unwrap();
    assert_eq!(poly.text("entity_id"), Some("2"));
    let asym = block.get("struct_asym").unwrap().first().unwrap();
    assert_eq!(asym.text("entity_id"), Some("2"));
}

#[test]
fn rename_is_skipped_when_target_rows_exist() {
    let mut file = parse_validated(
        "data_test\n\
         loop_\n_entity.id\n_entity.type\n1 polymer\n2 water\n\
         loop_\n_entity_poly.entity_id\n_entity_poly.type\n1 a\n2 b\n",
    );
    let block = file.get_mut("test").unwrap();
    let row = block.get("entity").unwrap().find1(key("id").eq("1")).unwrap();

    // A child keyed to "2" already exists, so no rename happens.
    block.update_value("entity", row, "id", "2").unwrap();

    let poly = block.get("entity_poly").unwrap();
    assert_eq!(poly.count(key("entity_id").eq("1")), 1);
    assert_eq!(poly.count(key("entity_id").eq("2")), 1);
}

#[test]
fn erase_with_validator_purges_orphans() {
    let mut file = parse_validated(LINKED_FILE);
    let block = file.get_mut("test").unwrap();

    let erased = block.erase("entity", key("id").eq("1")).unwrap();
    assert_eq!(erased, 1);
    assert!(block.get("entity").unwrap().is_empty());
    assert!(block.get("entity_poly").unwrap().is_empty());
    assert!(block.get("struct_asym").unwrap().is_empty());
}

#[test]
fn erase_without_validator_retains_children() {
    let mut file = parse(LINKED_FILE);
    let block = file.get_mut("test").unwrap();

    let erased = block.erase("entity", key("id").eq("1")).unwrap();
    assert_eq!(erased, 1);
    assert_eq!(block.get("entity_poly").unwrap().len(), 1);
    assert_eq!(block.get("struct_asym").unwrap().len(), 1);
}

#[test]
fn children_with_other_parents_survive() {
    // Two entities share no children, but the child keyed to the
    // surviving entity must remain.
    let mut file = parse_validated(
        "data_test\n\
         loop_\n_entity.id\n_entity.type\n1 polymer\n2 water\n\
         loop_\n_entity_poly.entity_id\n_entity_poly.type\n1 a\n2 b\n",
    );
    let block = file.get_mut("test").unwrap();

    block.erase("entity", key("id").eq("1")).unwrap();

    let poly = block.get("entity_poly").unwrap();
    assert_eq!(poly.len(), 1);
    assert_eq!(poly.first().unwrap().text("entity_id"), Some("2"));
}

#[test]
fn erase_with_visitor_sees_rows_before_removal() {
    let mut file = parse_validated(
        "data_test\nloop_\n_entity.id\n_entity.type\n1 polymer\n2 water\n3 polymer\n",
    );
    let block = file.get_mut("test").unwrap();

    let mut seen = Vec::new();
    let erased = block
        .erase_with("entity", key("type").eq("polymer"), |row| {
            seen.push(row.text("id").unwrap().to_string());
        })
        .unwrap();
    assert_eq!(erased, 2);
    assert_eq!(seen, ["1", "3"]);
    assert_eq!(block.get("entity").unwrap().len(), 1);
}

#[test]
fn empty_to_value_update_behaves_like_legacy() {
    // The legacy write path cascades even when the parent key was empty:
    // child rows whose linked cell is empty follow the parent onto its
    // first real key value.
    let mut file = parse_validated(
        "data_test\n\
         _entity.type polymer\n\
         #\n\
         _entity_poly.type a\n",
    );
    let block = file.get_mut("test").unwrap();
    let parent = block.get("entity").unwrap().rows().next().unwrap().id();

    block.update_value("entity", parent, "id", "5").unwrap();

    let poly = block.get("entity_poly").unwrap().first().unwrap();
    assert_eq!(poly.text("entity_id"), Some("5"));
}

#[test]
fn key_index_agrees_with_a_scan() {
    let mut text = String::from("data_test\nloop_\n_entity.id\n_entity.type\n");
    for i in 0..1000 {
        let kind = if i % 2 == 0 { "polymer" } else { "water" };
        text.push_str(&format!("{i} {kind}\n"));
    }
    let file = parse_validated(&text);
    let cat = file.get("test").unwrap().get("entity").unwrap();

    // The full-key equality goes through the index; an equivalent
    // condition the optimizer cannot collapse scans. Both agree.
    let fast = cat.find(key("id").eq("617"));
    let slow = cat.find(key("id").eq("617") & Condition::all() & key("type").is_not_empty());
    assert_eq!(fast.len(), 1);
    assert_eq!(fast, slow);
    assert_eq!(cat.row(fast[0]).text("type"), Some("water"));

    // Absent keys agree too.
    assert!(cat.find(key("id").eq("5000")).is_empty());
}

#[test]
fn key_index_follows_updates_and_erases() {
    let mut file = parse_validated(
        "data_test\nloop_\n_entity.id\n_entity.type\n1 polymer\n2 water\n3 water\n",
    );
    let block = file.get_mut("test").unwrap();
    let row = block.get("entity").unwrap().find1(key("id").eq("2")).unwrap();
    block.update_value("entity", row, "id", "9").unwrap();

    let cat = block.get("entity").unwrap();
    assert!(cat.find(key("id").eq("2")).is_empty());
    assert_eq!(cat.find(key("id").eq("9")), vec![row]);

    let block = file.get_mut("test").unwrap();
    block.erase("entity", key("id").eq("9")).unwrap();
    let cat = block.get("entity").unwrap();
    assert!(cat.find(key("id").eq("9")).is_empty());
    assert_eq!(cat.len(), 2);
}

#[test]
fn cascaded_update_does_not_recascade() {
    // entity_poly.entity_id is itself nobody's parent key here, but the
    // rename must not loop back into entity. A rename that completes
    // leaves exactly one child row per category.
    let mut file = parse_validated(LINKED_FILE);
    let block = file.get_mut("test").unwrap();
    let row = block.get("entity").unwrap().find1(key("id").eq("1")).unwrap();
    block.update_value("entity", row, "id", "7").unwrap();

    assert_eq!(block.get("entity").unwrap().len(), 1);
    assert_eq!(block.get("entity_poly").unwrap().len(), 1);
    assert_eq!(block.get("struct_asym").unwrap().len(), 1);
}
