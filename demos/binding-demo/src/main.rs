use std::cell::RefCell;
use std::rc::Rc;

use rebind_core::*;

/// Stand-in for a rendered text node bound to a key.
#[derive(Default)]
struct Label {
    text: String,
    renders: usize,
}

fn bind_label(scope: &Scope, cell: &Cell<String>) -> Rc<RefCell<Label>> {
    let label = Rc::new(RefCell::new(Label {
        text: cell.read(),
        renders: 0,
    }));
    scope.subscribe(cell, {
        let label = label.clone();
        move |new, _, key| {
            let mut label = label.borrow_mut();
            label.text = new.clone();
            label.renders += 1;
            log::info!("render {key}: {new:?}");
        }
    });
    label
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let registry: Registry<String> =
        Registry::with_config(RegistryConfig::default().with_max_drain_cycles(16));
    registry.on_delivery_failure(|failure| {
        log::info!("failure hook: {failure}");
    });

    let (_, set_message) = keyed_state(&registry, "message", || "Hello rebind".to_string());
    let view = Scope::new();
    let label = bind_label(&view, set_message.cell());

    // Normalise input in place; the trimmed write is queued behind the
    // current cycle.
    view.subscribe(set_message.cell(), {
        let registry = registry.downgrade();
        move |new, _, key| {
            let trimmed = new.trim();
            if trimmed != new.as_str() {
                if let Some(registry) = registry.upgrade() {
                    registry.write(key, trimmed.to_string());
                }
            }
        }
    });

    // A validator that rejects empty text; its failure does not block the label.
    view.subscribe_fallible(set_message.cell(), |new, _, _| {
        anyhow::ensure!(!new.is_empty(), "message must not be empty");
        Ok(())
    });

    // Simulated keystrokes from an input element.
    for input in ["Hello", "  Hello world  ", "Hello world", ""] {
        let outcome = set_message.set(input.to_string());
        println!("input {input:?} -> {outcome:?}");
    }
    {
        let label = label.borrow();
        println!("label shows {:?} after {} render(s)", label.text, label.renders);
    }

    registry.write("title", "Demo".to_string());
    println!("snapshot: {}", registry.to_json()?);

    // Tear the view down, then drop and recreate the key.
    view.dispose();
    registry.remove("message");
    let message = registry.get_or_create("message", "fresh".to_string());
    message.write("after removal".to_string());
    println!(
        "message = {:?}, label still shows {:?}",
        registry.read("message")?,
        label.borrow().text
    );

    if let Err(err) = registry.get("missing") {
        println!("lookup failed as expected: {err}");
    }

    Ok(())
}
