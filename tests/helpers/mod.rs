//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use cifkit::dictionary::parse_dictionary;
use cifkit::{File, Validator};

/// A small mmCIF-style dictionary: `entry`, `audit_conform`, `entity` (key
/// `id`) with two child categories `entity_poly` and `struct_asym` linked
/// on `entity_id` → `id`.
pub const TEST_DICT: &str = r#"data_cifkit_test.dic
#
loop_
_item_type_list.code
_item_type_list.primitive_code
_item_type_list.construct
code char '[A-Za-z0-9_,.()=-]+'
line char '[][ A-Za-z0-9_,.;:()=/%&<>?+*-]*'
int  numb '[+-]?[0-9]+'
float numb '[+-]?(([0-9]+[.]?[0-9]*)|([.][0-9]+))([(][0-9]+[)])?([eE][+-]?[0-9]+)?'
#
save_entry
_category.id entry
_category.mandatory_code no
_category_key.name '_entry.id'
save_

save__entry.id
_item.name '_entry.id'
_item.category_id entry
_item.mandatory_code yes
_item_type.code code
save_

save_audit_conform
_category.id audit_conform
_category.mandatory_code no
_category_key.name '_audit_conform.dict_name'
save_

save__audit_conform.dict_name
_item.name '_audit_conform.dict_name'
_item.category_id audit_conform
_item.mandatory_code yes
_item_type.code code
save_

save__audit_conform.dict_version
_item.name '_audit_conform.dict_version'
_item.category_id audit_conform
_item.mandatory_code no
_item_type.code code
save_

save_entity
_category.id entity
_category.mandatory_code no
_category_key.name '_entity.id'
save_

save__entity.id
_item.name '_entity.id'
_item.category_id entity
_item.mandatory_code yes
_item_type.code code
save_

save__entity.type
_item.name '_entity.type'
_item.category_id entity
_item.mandatory_code no
_item_type.code code
loop_
_item_enumeration.value
polymer
non-polymer
water
save_

save__entity.formula_weight
_item.name '_entity.formula_weight'
_item.category_id entity
_item.mandatory_code no
_item_type.code float
save_

save__entity.details
_item.name '_entity.details'
_item.category_id entity
_item.mandatory_code no
_item_type.code line
save_

save_entity_poly
_category.id entity_poly
_category.mandatory_code no
_category_key.name '_entity_poly.entity_id'
save_

save__entity_poly.entity_id
_item.name '_entity_poly.entity_id'
_item.category_id entity_poly
_item.mandatory_code yes
save_

save__entity_poly.type
_item.name '_entity_poly.type'
_item.category_id entity_poly
_item.mandatory_code no
_item_type.code code
save_

save_struct_asym
_category.id struct_asym
_category.mandatory_code no
_category_key.name '_struct_asym.id'
save_

save__struct_asym.id
_item.name '_struct_asym.id'
_item.category_id struct_asym
_item.mandatory_code yes
_item_type.code code
save_

save__struct_asym.entity_id
_item.name '_struct_asym.entity_id'
_item.category_id struct_asym
_item.mandatory_code no
save_

loop_
_pdbx_item_linked_group_list.child_category_id
_pdbx_item_linked_group_list.child_name
_pdbx_item_linked_group_list.parent_name
_pdbx_item_linked_group_list.parent_category_id
_pdbx_item_linked_group_list.link_group_id
entity_poly '_entity_poly.entity_id' '_entity.id' entity 1
struct_asym '_struct_asym.entity_id' '_entity.id' entity 1
#
loop_
_pdbx_item_linked_group.category_id
_pdbx_item_linked_group.link_group_id
_pdbx_item_linked_group.label
entity_poly 1 entity_poly:entity
struct_asym 1 struct_asym:entity
#
_dictionary.title cifkit_test
_dictionary.version 1.0
"#;

pub fn test_validator() -> Arc<Validator> {
    Arc::new(parse_dictionary("cifkit_test", Cursor::new(TEST_DICT)).expect("fixture dictionary loads"))
}

pub fn parse(text: &str) -> File {
    File::parse(text).expect("fixture parses")
}

pub fn parse_validated(text: &str) -> File {
    let mut file = parse(text);
    file.set_validator(Some(test_validator()));
    file
}

/// One entity with one row in each child category.
pub const LINKED_FILE: &str = r#"data_test
_entity.id 1
_entity.type polymer
#
_entity_poly.entity_id 1
_entity_poly.type polypeptide(L)
#
_struct_asym.id A
_struct_asym.entity_id 1
"#;
