//! Thread-bound context fields merged into every record logged on the thread.

use crate::record::FieldValue;
use std::cell::RefCell;

thread_local! {
    static BOUND: RefCell<Vec<(String, FieldValue)>> = const { RefCell::new(Vec::new()) };
}

/// Bind fields for the current thread. Existing keys are overwritten in place.
pub fn bind_contextvars<K, V>(fields: impl IntoIterator<Item = (K, V)>)
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    BOUND.with(|bound| {
        let mut bound = bound.borrow_mut();
        for (k, v) in fields {
            let key = k.into();
            let value = v.into();
            match bound.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, slot)) => *slot = value,
                None => bound.push((key, value)),
            }
        }
    });
}

pub fn unbind_contextvars(keys: &[&str]) {
    BOUND.with(|bound| bound.borrow_mut().retain(|(k, _)| !keys.contains(&k.as_str())));
}

pub fn clear_contextvars() {
    BOUND.with(|bound| bound.borrow_mut().clear());
}

/// Snapshot of the fields bound on this thread, in bind order.
pub fn get_contextvars() -> Vec<(String, FieldValue)> {
    BOUND.with(|bound| bound.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_overwrite_and_unbind() {
        clear_contextvars();
        bind_contextvars([("ti_id", "abc"), ("try_number", "1")]);
        bind_contextvars([("ti_id", "def")]);
        let vars = get_contextvars();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0].1.as_str(), Some("def"));

        unbind_contextvars(&["try_number"]);
        assert_eq!(get_contextvars().len(), 1);
        clear_contextvars();
        assert!(get_contextvars().is_empty());
    }

    #[test]
    fn context_is_per_thread() {
        clear_contextvars();
        bind_contextvars([("dag_id", "etl")]);
        let other = std::thread::spawn(get_contextvars).join().unwrap();
        assert!(other.is_empty());
        clear_contextvars();
    }
}
