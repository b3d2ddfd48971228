use loomstate::{CommandDef, CommandOutput, StateDef, Store};
use proptest::prelude::*;

/// An arbitrary effect-tree shape: leaves carry the value they append.
#[derive(Debug, Clone)]
enum Shape {
    Leaf(u8),
    List(Vec<Shape>),
}

fn shape_strategy() -> impl Strategy<Value = Shape> {
    let leaf = any::<u8>().prop_map(Shape::Leaf);
    leaf.prop_recursive(4, 48, 6, |inner| {
        prop::collection::vec(inner, 0..6).prop_map(Shape::List)
    })
}

fn in_order(shape: &Shape, out: &mut Vec<u8>) {
    match shape {
        Shape::Leaf(value) => out.push(*value),
        Shape::List(children) => {
            for child in children {
                in_order(child, out);
            }
        }
    }
}

fn build(shape: &Shape, append: &CommandDef<u8>) -> CommandOutput {
    match shape {
        Shape::Leaf(value) => append.invoke(*value),
        Shape::List(children) => {
            CommandOutput::list(children.iter().map(|child| build(child, append)))
        }
    }
}

proptest! {
    /// Dispatch flattens any nesting depth-first, left-to-right: the applied
    /// leaf order equals the in-order traversal of the shape.
    #[test]
    fn prop_flattening_preserves_leaf_order(shape in shape_strategy()) {
        let log: StateDef<(), Vec<u8>> = StateDef::new("log", |_| Vec::new());
        let append = CommandDef::new("append", {
            let log = log.clone();
            move |ctx, value: &u8| {
                let mut entries = ctx.get(&log.item());
                entries.push(*value);
                log.item().set(entries)
            }
        });
        let outer = CommandDef::new("outer", {
            let append = append.clone();
            let shape = shape.clone();
            move |_ctx, _: &()| build(&shape, &append)
        });

        let store = Store::new();
        store.send_command(&outer.item()).unwrap();

        let mut want = Vec::new();
        in_order(&shape, &mut want);
        prop_assert_eq!(store.query(&log.item()).unwrap(), want);
    }
}
