use std::sync::{Arc, Mutex};

use loomstate::{CommandDef, StateDef};

/// Collects values delivered to subscriber callbacks for later assertions.
#[derive(Clone)]
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, value: T) {
        self.seen.lock().unwrap().push(value);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.seen.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl<T: Clone + Send + 'static> Default for Recorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The canonical counter pair: a zero-initialized state and a command that
/// increments it by one.
pub fn counter() -> (StateDef<(), i32>, CommandDef<()>) {
    let count: StateDef<(), i32> = StateDef::new("count", |_| 0);
    let incre = CommandDef::new("incre", {
        let count = count.clone();
        move |ctx, _: &()| {
            let current = ctx.get(&count.item());
            count.item().set(current + 1)
        }
    });
    (count, incre)
}
