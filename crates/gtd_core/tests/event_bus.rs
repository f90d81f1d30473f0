use gtd_core::{Channel, EntityKind, EventKind, GtdTree, HandlerError, PROJECT_NONE};
use std::cell::RefCell;
use std::rc::Rc;

type Log = Rc<RefCell<Vec<String>>>;

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn realm_added() -> Channel {
    Channel::new(EntityKind::Realm, EventKind::Added)
}

#[test]
fn delivery_follows_subscription_order() {
    let mut tree = GtdTree::new();
    let calls = log();
    for name in ["first", "second", "third"] {
        let calls = Rc::clone(&calls);
        tree.subscribe(realm_added(), name, move |_, _| {
            calls.borrow_mut().push(name.to_string());
            Ok(())
        });
    }

    tree.create_realm("Work").unwrap();
    assert_eq!(*calls.borrow(), vec!["first", "second", "third"]);
}

#[test]
fn failing_and_panicking_handlers_do_not_stop_delivery() {
    let mut tree = GtdTree::new();
    let calls = log();

    tree.subscribe(realm_added(), "fails", |_, _| {
        Err(HandlerError::new("disk full"))
    });
    tree.subscribe(realm_added(), "panics", |_, _| panic!("handler bug"));
    let sink = Rc::clone(&calls);
    tree.subscribe(realm_added(), "survivor", move |_, event| {
        sink.borrow_mut().push(event.id.to_string());
        Ok(())
    });

    let realm = tree.create_realm("Work").unwrap();
    assert_eq!(*calls.borrow(), vec![realm.to_string()]);
    assert!(tree.contains(realm));
}

#[test]
fn handlers_see_the_mutation_already_applied() {
    let mut tree = GtdTree::new();
    let seen = log();
    let sink = Rc::clone(&seen);
    tree.subscribe(
        Channel::new(EntityKind::Task, EventKind::Renamed),
        "reader",
        move |tree, event| {
            sink.borrow_mut()
                .push(tree.title(event.id).unwrap_or_default().to_string());
            Ok(())
        },
    );

    let task = tree.create_task("draft", PROJECT_NONE, &[]).unwrap();
    tree.set_title(task, "final").unwrap();
    assert_eq!(*seen.borrow(), vec!["final"]);
}

#[test]
fn nested_mutation_completes_before_outer_delivery_continues() {
    let mut tree = GtdTree::new();
    let calls = log();

    let sink = Rc::clone(&calls);
    tree.subscribe(realm_added(), "creates-area", move |tree, event| {
        sink.borrow_mut().push("outer:first".to_string());
        tree.create_area("Inbox", event.id)
            .map(|_| ())
            .map_err(|err| HandlerError::new(err.to_string()))
    });
    let sink = Rc::clone(&calls);
    tree.subscribe(realm_added(), "observer", move |_, _| {
        sink.borrow_mut().push("outer:second".to_string());
        Ok(())
    });
    let sink = Rc::clone(&calls);
    tree.subscribe(
        Channel::new(EntityKind::Area, EventKind::Added),
        "area-watcher",
        move |_, _| {
            sink.borrow_mut().push("nested".to_string());
            Ok(())
        },
    );

    let realm = tree.create_realm("Work").unwrap();
    assert_eq!(
        *calls.borrow(),
        vec!["outer:first", "nested", "outer:second"]
    );
    assert_eq!(tree.children(realm).len(), 1);
}

#[test]
fn unsubscribe_during_delivery_applies_to_next_event() {
    let mut tree = GtdTree::new();
    let calls = log();

    let victim_id = Rc::new(RefCell::new(None));
    let id_cell = Rc::clone(&victim_id);
    tree.subscribe(realm_added(), "remover", move |tree, _| {
        if let Some(id) = id_cell.borrow_mut().take() {
            tree.unsubscribe(id);
        }
        Ok(())
    });
    let sink = Rc::clone(&calls);
    let victim = tree.subscribe(realm_added(), "victim", move |_, _| {
        sink.borrow_mut().push("victim".to_string());
        Ok(())
    });
    *victim_id.borrow_mut() = Some(victim);

    tree.create_realm("First").unwrap();
    tree.create_realm("Second").unwrap();
    assert_eq!(*calls.borrow(), vec!["victim"]);
}

#[test]
fn subscribe_during_delivery_starts_with_next_event() {
    let mut tree = GtdTree::new();
    let calls = log();

    let sink = Rc::clone(&calls);
    let armed = Rc::new(RefCell::new(true));
    tree.subscribe(realm_added(), "installer", move |tree, _| {
        if armed.replace(false) {
            let sink = Rc::clone(&sink);
            tree.subscribe(realm_added(), "late", move |_, _| {
                sink.borrow_mut().push("late".to_string());
                Ok(())
            });
        }
        Ok(())
    });

    tree.create_realm("First").unwrap();
    assert!(calls.borrow().is_empty());
    tree.create_realm("Second").unwrap();
    assert_eq!(*calls.borrow(), vec!["late"]);
}
