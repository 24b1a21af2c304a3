use std::hash::Hash;

use hashbrown::HashMap;

pub type VecIndex<K, V> = HashMap<K, Vec<V>>;

pub fn push_to_vec_index<K: Hash + Eq, V>(index: &mut VecIndex<K, V>, key: K, value: V) {
    index.entry(key).or_default().push(value);
}

pub fn remove_from_vec_index<K: Hash + Eq, V: PartialEq>(
    index: &mut VecIndex<K, V>,
    key: &K,
    value: &V,
) {
    let emptied = match index.get_mut(key) {
        Some(values) => {
            if let Some(pos) = values.iter().position(|v| v == value) {
                values.remove(pos);
            }
            values.is_empty()
        }
        None => false,
    };
    if emptied {
        index.remove(key);
    }
}
