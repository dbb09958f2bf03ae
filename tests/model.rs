//! Store contract: case-insensitive lookup, stable order, emplace
//! semantics, queries and typed reads.

mod helpers;

use cifkit::{Error, File, key};
use helpers::parse;

#[test]
fn case_insensitive_lookup_everywhere() {
    let file = parse("data_Mixed\n_Cat.Col value\n");

    for block_name in ["Mixed", "MIXED", "mixed"] {
        let block = file.get(block_name).expect("block lookup");
        for cat_name in ["Cat", "CAT", "cat"] {
            let cat = block.get(cat_name).expect("category lookup");
            let row = cat.first().unwrap();
            for col_name in ["Col", "COL", "col"] {
                assert_eq!(row.text(col_name), Some("value"));
            }
        }
    }
}

#[test]
fn variant_spelling_does_not_create_duplicates() {
    let mut file = parse("data_X\n_t.a 1\n");
    {
        let block = file.get_mut("x").unwrap();
        let (ix_a, created) = block.emplace("T");
        assert!(!created);
        let (ix_b, _) = block.emplace("t");
        assert_eq!(ix_a, ix_b);
        assert_eq!(block.len(), 1);

        let cat = block.get_mut("t").unwrap();
        let row = cat.rows().next().unwrap().id();
        cat.assign(row, "A", "2").unwrap();
        assert_eq!(cat.column_count(), 1);
    }
}

#[test]
fn file_emplace_moves_existing_to_front() {
    let mut file = parse("data_A\n_t.x 1\ndata_B\n_t.x 2\ndata_C\n_t.x 3\n");
    file.emplace("C");
    let names: Vec<_> = file.blocks().map(|b| b.name()).collect();
    assert_eq!(names, ["C", "A", "B"]);

    // A second call is a no-op on contents.
    let before = file.get("C").unwrap().get("t").unwrap().len();
    file.emplace("C");
    assert_eq!(file.first().unwrap().name(), "C");
    assert_eq!(file.get("C").unwrap().get("t").unwrap().len(), before);
}

#[test]
fn rows_keep_insertion_order_across_mutation() {
    let mut file = File::new();
    let (block, _) = file.emplace("X");
    let cat = block.category_mut("t");
    for i in 0..5 {
        cat.emplace([("id", i.to_string().as_str())]).unwrap();
    }
    cat.erase(key("id").eq("2"));
    cat.emplace([("id", "5")]).unwrap();

    let ids: Vec<_> = cat.rows().map(|r| r.text("id").unwrap()).collect();
    assert_eq!(ids, ["0", "1", "3", "4", "5"]);
}

#[test]
fn find_count_exists() {
    let file = parse(
        "data_X\nloop_\n_atom.id\n_atom.symbol\n1 C\n2 N\n3 C\n4 O\n",
    );
    let cat = file.get("X").unwrap().get("atom").unwrap();

    assert_eq!(cat.count(key("symbol").eq("C")), 2);
    assert!(cat.exists(key("symbol").eq("O")));
    assert!(!cat.exists(key("symbol").eq("Fe")));

    let rows = cat.find(key("symbol").eq("C") | key("symbol").eq("O"));
    let ids: Vec<_> = rows.iter().map(|&r| cat.row(r).text("id").unwrap()).collect();
    assert_eq!(ids, ["1", "3", "4"]);
}

#[test]
fn find1_not_found_and_ambiguous() {
    let file = parse("data_X\nloop_\n_t.a\n1\n1\n");
    let cat = file.get("X").unwrap().get("t").unwrap();
    assert!(matches!(cat.find1(key("a").eq("2")), Err(Error::NotFound(_))));
    assert!(matches!(cat.find1(key("a").eq("1")), Err(Error::Ambiguous(_))));
}

#[test]
fn typed_reads() {
    let file = parse(
        "data_X\n_m.count 42\n_m.weight 2.5\n_m.flag yes\n_m.missing ?\n_m.name HEM\n",
    );
    let row = file.get("X").unwrap().get("m").unwrap().first().unwrap();

    assert_eq!(row.get::<i32>("count"), Some(42));
    assert_eq!(row.get::<f64>("weight"), Some(2.5));
    assert_eq!(row.get::<bool>("flag"), Some(true));
    assert_eq!(row.get::<String>("missing"), None);

    let (count, weight, name): (u32, f32, String) =
        row.get_tuple(&["count", "weight", "name"]).unwrap();
    assert_eq!((count, name.as_str()), (42, "HEM"));
    assert!((weight - 2.5).abs() < 1e-6);
}

#[test]
fn batch_assign_applies_all_cells() {
    let mut file = parse("data_X\n_t.a 1\n_t.b 2\n");
    let block = file.get_mut("X").unwrap();
    let row = {
        let cat = block.get("t").unwrap();
        cat.rows().next().unwrap().id()
    };
    block.assign("t", row, &[("a", "10"), ("b", "20"), ("c", "30")]).unwrap();

    let cat = block.get("t").unwrap();
    let handle = cat.row(row);
    assert_eq!(handle.text("a"), Some("10"));
    assert_eq!(handle.text("b"), Some("20"));
    assert_eq!(handle.text("c"), Some("30"));
}

#[test]
fn parse_single_datablock_from_reader() {
    let input = "data_A\n_t.x 1\ndata_B\n_t.x 2\ndata_C\n_t.x 3\n";
    let mut file = File::new();
    let found = file
        .read_single_datablock(std::io::Cursor::new(input), "b")
        .unwrap();
    assert!(found);
    assert_eq!(file.len(), 1);
    assert_eq!(file.first().unwrap().name(), "B");
}

#[test]
fn gzip_roundtrip_through_the_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("model.cif");
    let gzipped = dir.path().join("model.cif.gz");

    let file = parse("data_X\nloop_\n_t.a\n_t.b\n1 one\n2 two\n");
    file.save(&plain).unwrap();
    file.save(&gzipped).unwrap();

    // The gzip copy really is gzip.
    let bytes = std::fs::read(&gzipped).unwrap();
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

    // Both load back to the same tree; detection is by magic, not name.
    let from_plain = File::load(&plain).unwrap();
    let from_gzip = File::load(&gzipped).unwrap();
    assert_eq!(from_plain, file);
    assert_eq!(from_gzip, file);

    // A gzip payload under a non-.gz name still loads.
    let disguised = dir.path().join("disguised.cif");
    std::fs::copy(&gzipped, &disguised).unwrap();
    assert_eq!(File::load(&disguised).unwrap(), file);
}
