//! Per-component column stores.
//!
//! A store owns one column per schema property. Scalar and boolean
//! properties get a dense [`TypedBuffer`] of one element per entity.
//! Sub-array properties share a single backing buffer per element type,
//! laid out by a per-type cursor at store creation; entity `e`'s slice of
//! property `p` lives at `base_p * size + e * len_p`. Faux properties are
//! eid-keyed value maps. A tag store carries no columns at all; membership
//! is encoded solely in the entity bitmasks.

use crate::schema::{ComponentSchema, ElementType, FauxKind, PropertyType};
use crate::storage::buffer::TypedBuffer;
use crate::world::Eid;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub enum Column {
    Scalar {
        key: String,
        data: TypedBuffer,
        /// u8 storage projected to true/false on read.
        boolean: bool,
    },
    SubArray {
        key: String,
        element: ElementType,
        length: usize,
        /// Element offset of this property's region divided by `size`:
        /// the sum of lengths of earlier same-type sub-array properties.
        base: usize,
        /// Smallest unsigned type able to index `length`; cached for the
        /// serializer's dirty-index lists.
        index_type: ElementType,
    },
    Faux {
        key: String,
        kind: FauxKind,
        values: HashMap<Eid, Value>,
    },
}

impl Column {
    pub fn key(&self) -> &str {
        match self {
            Column::Scalar { key, .. } => key,
            Column::SubArray { key, .. } => key,
            Column::Faux { key, .. } => key,
        }
    }
}

/// Snapshot of one column's contents, owned by the delta serializer.
#[derive(Debug, Clone)]
pub enum Shadow {
    Scalar(TypedBuffer),
    /// Clone of the property's region of the shared backing buffer;
    /// entity `e`'s slice starts at `e * length`.
    SubArray(TypedBuffer),
    Faux(HashMap<Eid, Value>),
}

#[derive(Debug)]
pub struct Store {
    size: usize,
    columns: Vec<Column>,
    /// Shared sub-array backing buffers, one per element type. Byte length
    /// is rounded up to a multiple of 4.
    shared: HashMap<ElementType, TypedBuffer>,
    tag: bool,
}

fn shared_len(total_elements: usize, element: ElementType) -> usize {
    let bytes = total_elements * element.byte_width();
    let padded = (bytes + 3) & !3;
    padded / element.byte_width()
}

impl Store {
    pub fn new(schema: &ComponentSchema, size: usize) -> Store {
        let mut columns = Vec::with_capacity(schema.properties().len());
        // Per-element-type cursor for sub-array region layout.
        let mut cursors: HashMap<ElementType, usize> = HashMap::new();

        for prop in schema.properties() {
            let column = match &prop.prop_type {
                PropertyType::Scalar(element) => Column::Scalar {
                    key: prop.key.clone(),
                    data: TypedBuffer::zeroed(*element, size),
                    boolean: false,
                },
                PropertyType::Boolean => Column::Scalar {
                    key: prop.key.clone(),
                    data: TypedBuffer::zeroed(ElementType::U8, size),
                    boolean: true,
                },
                PropertyType::SubArray { element, length } => {
                    let cursor = cursors.entry(*element).or_insert(0);
                    let base = *cursor;
                    *cursor += *length;
                    Column::SubArray {
                        key: prop.key.clone(),
                        element: *element,
                        length: *length,
                        base,
                        index_type: ElementType::index_type_for(*length),
                    }
                }
                PropertyType::Faux(kind) => Column::Faux {
                    key: prop.key.clone(),
                    kind: kind.clone(),
                    values: HashMap::new(),
                },
            };
            columns.push(column);
        }

        let shared = cursors
            .into_iter()
            .map(|(element, total)| {
                (element, TypedBuffer::zeroed(element, shared_len(total * size, element)))
            })
            .collect();

        Store {
            size,
            tag: columns.is_empty(),
            columns,
            shared,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_tag(&self) -> bool {
        self.tag
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> &Column {
        &self.columns[idx]
    }

    pub fn column_index(&self, key: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.key() == key)
    }

    /// The shared backing buffer a sub-array column slices into.
    pub fn parent_buffer(&self, idx: usize) -> Option<&TypedBuffer> {
        match &self.columns[idx] {
            Column::SubArray { element, .. } => self.shared.get(element),
            _ => None,
        }
    }

    fn sub_start(&self, base: usize, length: usize, eid: Eid) -> usize {
        base * self.size + eid as usize * length
    }

    pub fn scalar_get(&self, idx: usize, eid: Eid) -> f64 {
        match &self.columns[idx] {
            Column::Scalar { data, .. } => data.get(eid as usize),
            _ => panic!("column {} is not scalar", idx),
        }
    }

    pub fn scalar_set(&mut self, idx: usize, eid: Eid, value: f64) {
        match &mut self.columns[idx] {
            Column::Scalar { data, .. } => data.set(eid as usize, value),
            _ => panic!("column {} is not scalar", idx),
        }
    }

    pub fn sub_len(&self, idx: usize) -> usize {
        match &self.columns[idx] {
            Column::SubArray { length, .. } => *length,
            _ => panic!("column {} is not a sub-array", idx),
        }
    }

    pub fn sub_get(&self, idx: usize, eid: Eid, i: usize) -> f64 {
        match &self.columns[idx] {
            Column::SubArray { element, length, base, .. } => {
                debug_assert!(i < *length);
                let start = self.sub_start(*base, *length, eid);
                self.shared[element].get(start + i)
            }
            _ => panic!("column {} is not a sub-array", idx),
        }
    }

    pub fn sub_set(&mut self, idx: usize, eid: Eid, i: usize, value: f64) {
        match &self.columns[idx] {
            Column::SubArray { element, length, base, .. } => {
                debug_assert!(i < *length);
                let start = self.sub_start(*base, *length, eid);
                let element = *element;
                self.shared
                    .get_mut(&element)
                    .expect("shared buffer for sub-array element type")
                    .set(start + i, value);
            }
            _ => panic!("column {} is not a sub-array", idx),
        }
    }

    pub fn faux_get(&self, idx: usize, eid: Eid) -> Option<&Value> {
        match &self.columns[idx] {
            Column::Faux { values, .. } => values.get(&eid),
            _ => panic!("column {} is not faux", idx),
        }
    }

    pub fn faux_set(&mut self, idx: usize, eid: Eid, value: Value) {
        match &mut self.columns[idx] {
            Column::Faux { values, .. } => {
                values.insert(eid, value);
            }
            _ => panic!("column {} is not faux", idx),
        }
    }

    pub fn faux_remove(&mut self, idx: usize, eid: Eid) {
        match &mut self.columns[idx] {
            Column::Faux { values, .. } => {
                values.remove(&eid);
            }
            _ => panic!("column {} is not faux", idx),
        }
    }

    /// Zero-fills every column and drops all faux values.
    pub fn reset(&mut self) {
        for column in &mut self.columns {
            match column {
                Column::Scalar { data, .. } => data.fill_zero_all(),
                Column::SubArray { .. } => {}
                Column::Faux { values, .. } => values.clear(),
            }
        }
        for buffer in self.shared.values_mut() {
            buffer.fill_zero_all();
        }
    }

    /// Clears one entity's slot in every column. No-op on tag stores.
    pub fn reset_for(&mut self, eid: Eid) {
        let size = self.size;
        let shared = &mut self.shared;
        for column in &mut self.columns {
            match column {
                Column::Scalar { data, .. } => data.set(eid as usize, 0.0),
                Column::SubArray { element, length, base, .. } => {
                    let start = *base * size + eid as usize * *length;
                    if let Some(buffer) = shared.get_mut(element) {
                        buffer.fill_zero(start..start + *length);
                    }
                }
                Column::Faux { values, .. } => {
                    values.remove(&eid);
                }
            }
        }
    }

    /// Reallocates every column for `new_size` entities, copying surviving
    /// rows. Sub-array backings are reallocated and every per-entity slice
    /// re-sliced into the new layout.
    pub fn resize(&mut self, new_size: usize) {
        let copy = self.size.min(new_size);

        for column in &mut self.columns {
            if let Column::Scalar { data, .. } = column {
                let mut grown = TypedBuffer::zeroed(data.element(), new_size);
                grown.copy_from(0, data, 0, copy);
                *data = grown;
            }
        }

        // Total sub-array elements per type, for the new backing lengths.
        let mut totals: HashMap<ElementType, usize> = HashMap::new();
        for column in &self.columns {
            if let Column::SubArray { element, length, .. } = column {
                *totals.entry(*element).or_insert(0) += length;
            }
        }
        let mut fresh: HashMap<ElementType, TypedBuffer> = totals
            .into_iter()
            .map(|(element, total)| {
                (element, TypedBuffer::zeroed(element, shared_len(total * new_size, element)))
            })
            .collect();

        for column in &self.columns {
            if let Column::SubArray { element, length, base, .. } = column {
                let old = &self.shared[element];
                let new = fresh
                    .get_mut(element)
                    .expect("fresh shared buffer for sub-array element type");
                for eid in 0..copy {
                    let old_start = base * self.size + eid * length;
                    let new_start = base * new_size + eid * length;
                    new.copy_from(new_start, old, old_start, *length);
                }
            }
        }

        self.shared = fresh;
        self.size = new_size;
    }

    /// Snapshots one column for delta diffing.
    pub fn create_shadow(&self, idx: usize) -> Shadow {
        match &self.columns[idx] {
            Column::Scalar { data, .. } => Shadow::Scalar(data.clone()),
            Column::SubArray { element, length, base, .. } => {
                let region_len = length * self.size;
                let mut region = TypedBuffer::zeroed(*element, region_len);
                region.copy_from(0, &self.shared[element], base * self.size, region_len);
                Shadow::SubArray(region)
            }
            Column::Faux { values, .. } => Shadow::Faux(values.clone()),
        }
    }

    /// Reads one column slot as a JSON value (booleans projected, integer
    /// elements emitted as integers).
    pub fn read_value(&self, idx: usize, eid: Eid) -> Value {
        match &self.columns[idx] {
            Column::Scalar { data, boolean, .. } => {
                let raw = data.get(eid as usize);
                if *boolean {
                    Value::Bool(raw != 0.0)
                } else {
                    number_value(data.element(), raw)
                }
            }
            Column::SubArray { element, length, .. } => Value::Array(
                (0..*length)
                    .map(|i| number_value(*element, self.sub_get(idx, eid, i)))
                    .collect(),
            ),
            Column::Faux { values, .. } => values.get(&eid).cloned().unwrap_or(Value::Null),
        }
    }

    /// Writes a JSON value into one column slot. The caller has already
    /// validated the value against the schema.
    pub fn write_value(&mut self, idx: usize, eid: Eid, value: &Value) {
        match &self.columns[idx] {
            Column::Scalar { boolean, .. } => {
                let raw = if *boolean {
                    match value {
                        Value::Bool(b) => *b as u8 as f64,
                        other => other.as_f64().unwrap_or(0.0),
                    }
                } else {
                    value.as_f64().unwrap_or(0.0)
                };
                self.scalar_set(idx, eid, raw);
            }
            Column::SubArray { length, .. } => {
                let length = *length;
                if let Value::Array(items) = value {
                    for (i, item) in items.iter().take(length).enumerate() {
                        self.sub_set(idx, eid, i, item.as_f64().unwrap_or(0.0));
                    }
                }
            }
            Column::Faux { .. } => self.faux_set(idx, eid, value.clone()),
        }
    }
}

fn number_value(element: ElementType, raw: f64) -> Value {
    match element {
        ElementType::F32 | ElementType::F64 => {
            serde_json::Number::from_f64(raw).map(Value::Number).unwrap_or(Value::Null)
        }
        ElementType::I8 | ElementType::I16 | ElementType::I32 => {
            Value::Number(serde_json::Number::from(raw as i64))
        }
        _ => Value::Number(serde_json::Number::from(raw as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ComponentBuilder;
    use serde_json::json;

    fn body_schema() -> std::sync::Arc<ComponentSchema> {
        ComponentBuilder::new("Body")
            .scalar("mass", ElementType::F64, 0.0)
            .boolean("fixed", false)
            .subarray("extents", ElementType::F32, 3, &[])
            .subarray("cells", ElementType::F32, 2, &[])
            .faux("label", FauxKind::Str, Value::Null)
            .build()
    }

    #[test]
    fn subarray_regions_share_one_backing() {
        let schema = body_schema();
        let store = Store::new(&schema, 4);

        // extents and cells are both f32: one backing of (3+2)*4 elements.
        let extents = store.column_index("extents").unwrap();
        let parent = store.parent_buffer(extents).unwrap();
        assert_eq!(parent.len(), (3 + 2) * 4);
        match store.column(store.column_index("cells").unwrap()) {
            Column::SubArray { base, .. } => assert_eq!(*base, 3),
            _ => unreachable!(),
        }
    }

    #[test]
    fn backing_byte_length_rounds_to_four() {
        let schema = ComponentBuilder::new("Bytes")
            .subarray("bits", ElementType::U8, 3, &[])
            .build();
        let store = Store::new(&schema, 3);
        // 9 bytes of u8 rounds up to 12.
        let idx = store.column_index("bits").unwrap();
        assert_eq!(store.parent_buffer(idx).unwrap().len(), 12);
    }

    #[test]
    fn reset_for_clears_one_row() {
        let schema = body_schema();
        let mut store = Store::new(&schema, 4);
        let mass = store.column_index("mass").unwrap();
        let extents = store.column_index("extents").unwrap();
        let label = store.column_index("label").unwrap();

        store.scalar_set(mass, 1, 9.0);
        store.scalar_set(mass, 2, 5.0);
        store.sub_set(extents, 1, 0, 7.0);
        store.faux_set(label, 1, json!("a"));

        store.reset_for(1);
        assert_eq!(store.scalar_get(mass, 1), 0.0);
        assert_eq!(store.scalar_get(mass, 2), 5.0);
        assert_eq!(store.sub_get(extents, 1, 0), 0.0);
        assert!(store.faux_get(label, 1).is_none());
    }

    #[test]
    fn resize_preserves_slices() {
        let schema = body_schema();
        let mut store = Store::new(&schema, 2);
        let extents = store.column_index("extents").unwrap();
        let cells = store.column_index("cells").unwrap();
        store.sub_set(extents, 1, 2, 4.5);
        store.sub_set(cells, 0, 1, -2.0);

        store.resize(8);
        assert_eq!(store.size(), 8);
        assert_eq!(store.sub_get(extents, 1, 2), 4.5);
        assert_eq!(store.sub_get(cells, 0, 1), -2.0);
        assert_eq!(store.sub_get(extents, 7, 0), 0.0);
    }

    #[test]
    fn read_write_values() {
        let schema = body_schema();
        let mut store = Store::new(&schema, 2);
        let fixed = store.column_index("fixed").unwrap();
        let extents = store.column_index("extents").unwrap();

        store.write_value(fixed, 0, &json!(true));
        assert_eq!(store.read_value(fixed, 0), json!(true));

        store.write_value(extents, 0, &json!([1.5, 2.5]));
        assert_eq!(store.read_value(extents, 0), json!([1.5, 2.5, 0.0]));
    }

    #[test]
    fn shadow_clones_region() {
        let schema = body_schema();
        let mut store = Store::new(&schema, 2);
        let extents = store.column_index("extents").unwrap();
        store.sub_set(extents, 1, 1, 3.0);

        let shadow = store.create_shadow(extents);
        store.sub_set(extents, 1, 1, 9.0);
        match shadow {
            Shadow::SubArray(region) => assert_eq!(region.get(1 * 3 + 1), 3.0),
            _ => unreachable!(),
        }
    }

    #[test]
    fn tag_store_has_no_columns() {
        let schema = ComponentBuilder::new("Frozen").build();
        let mut store = Store::new(&schema, 4);
        assert!(store.is_tag());
        store.reset_for(2);
        assert!(store.columns().is_empty());
    }
}
