//! `optimist demo`: a todo list driven through the dispatch pipeline against
//! an in-memory store with artificial latency.

use crate::{application::runtime, options::Options};
use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use optimist::{
    App, Change, Controller, Draft, Effect, Io, Maybe, Module, Script, Status, View, MOUNT,
};
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::info;

#[derive(clap::Parser, Debug)]
pub(crate) struct Args {
    /// How long every store operation takes
    #[arg(long, default_value_t = 300)]
    latency_ms: u64,

    /// Make every write to the store fail
    #[arg(long, default_value_t = false)]
    fail: bool,
}

/// Backend of the todo list.
#[async_trait]
pub(crate) trait TaskStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Value>>;
    async fn create(&self, summary: &str) -> Result<Value>;
    async fn rename(&self, id: u64, summary: &str) -> Result<Value>;
    async fn delete(&self, id: u64) -> Result<()>;
}

pub(crate) struct MemoryStore {
    tasks: tokio::sync::Mutex<BTreeMap<u64, Value>>,
    next_id: AtomicU64,
    latency: Duration,
    fail: bool,
}

impl MemoryStore {
    pub(crate) fn new(latency: Duration, fail: bool) -> Self {
        MemoryStore {
            tasks: Default::default(),
            next_id: AtomicU64::new(1),
            latency,
            fail,
        }
    }

    async fn write(&self) -> Result<()> {
        tokio::time::sleep(self.latency).await;
        if self.fail {
            bail!("store is read-only");
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn list(&self) -> Result<Vec<Value>> {
        tokio::time::sleep(self.latency).await;
        Ok(self.tasks.lock().await.values().cloned().collect())
    }

    async fn create(&self, summary: &str) -> Result<Value> {
        self.write().await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let task = json!({"id": id, "summary": summary});
        self.tasks.lock().await.insert(id, task.clone());
        Ok(task)
    }

    async fn rename(&self, id: u64, summary: &str) -> Result<Value> {
        self.write().await?;
        let mut tasks = self.tasks.lock().await;
        let Some(task) = tasks.get_mut(&id) else {
            bail!("no task with id {}", id);
        };
        task["summary"] = json!(summary);
        Ok(task.clone())
    }

    async fn delete(&self, id: u64) -> Result<()> {
        self.write().await?;
        if self.tasks.lock().await.remove(&id).is_none() {
            bail!("no task with id {}", id);
        }
        Ok(())
    }
}

fn tasks_mut(draft: &mut Draft) -> Result<&mut Vec<Value>> {
    draft["tasks"]
        .as_array_mut()
        .context("state has no task list")
}

fn position(tasks: &[Value], id: &Value) -> Option<usize> {
    tasks.iter().position(|t| &t["id"] == id)
}

/// Client-side key of a task that the store has not assigned an id yet.
fn draft_key() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    format!("draft-{}", NEXT.fetch_add(1, Ordering::SeqCst))
}

pub(crate) fn todo_controller(store: Arc<dyn TaskStore>) -> Controller {
    let (on_mount, on_add, on_rename, on_remove, on_refresh) = (
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store,
    );
    Controller::new()
        .on(MOUNT, move |_, _| {
            let store = on_mount.clone();
            Ok(Script::new()
                .io(Io::new(
                    Effect::new(move || async move { store.list().await.map(|tasks| json!(tasks)) }),
                    |listed, draft| {
                        draft["tasks"] = listed.otherwise(json!([]))?;
                        draft["loading"] = json!(false);
                        Ok(())
                    },
                ))
                .produce(|draft| {
                    draft["loading"] = json!(true);
                    Ok(())
                }))
        })
        .on("add", move |payload, _| {
            let summary = payload
                .as_str()
                .context("add expects the summary as a string")?
                .to_owned();
            let key = draft_key();
            let store = on_add.clone();
            let stored = summary.clone();
            let placeholder = json!({"key": key, "summary": summary});
            Ok(Script::new()
                .io(Io::new(
                    Effect::new(move || async move { store.create(&stored).await }),
                    move |created, draft| {
                        let tasks = tasks_mut(draft)?;
                        let Some(index) = tasks.iter().position(|t| t["key"] == key.as_str()) else {
                            return Ok(());
                        };
                        match created {
                            Maybe::Present(task) => tasks[index] = task,
                            Maybe::Absent => {}
                            Maybe::Fault(_) => {
                                tasks.remove(index);
                                draft.annotate("tasks", Status::FAILED);
                            }
                        }
                        Ok(())
                    },
                ))
                .produce(move |draft| {
                    tasks_mut(draft)?.push(placeholder);
                    Ok(())
                }))
        })
        .on("rename", move |payload, model| {
            let id = payload["id"].as_u64().context("rename expects an id")?;
            let summary = payload["summary"]
                .as_str()
                .context("rename expects a summary")?
                .to_owned();
            let previous = model["tasks"]
                .as_array()
                .and_then(|tasks| position(tasks, &json!(id)).map(|i| tasks[i].clone()))
                .with_context(|| format!("no task with id {}", id))?;
            let store = on_rename.clone();
            let stored = summary.clone();
            Ok(Script::new()
                .io(Io::new(
                    Effect::new(move || async move { store.rename(id, &stored).await }),
                    move |renamed, draft| {
                        let tasks = tasks_mut(draft)?;
                        let Some(index) = position(tasks, &json!(id)) else {
                            return Ok(());
                        };
                        match renamed {
                            Maybe::Present(task) => tasks[index] = task,
                            Maybe::Absent => {}
                            Maybe::Fault(_) => {
                                tasks[index] = previous;
                                draft.annotate(optimist::path!("tasks", index), Status::FAILED);
                            }
                        }
                        Ok(())
                    },
                ))
                .produce(move |draft| {
                    let tasks = tasks_mut(draft)?;
                    if let Some(index) = position(tasks, &json!(id)) {
                        tasks[index]["summary"] = json!(summary);
                    }
                    Ok(())
                }))
        })
        .on("remove", move |payload, model| {
            let id = payload.as_u64().context("remove expects an id")?;
            let removed = model["tasks"]
                .as_array()
                .and_then(|tasks| position(tasks, &json!(id)).map(|i| (i, tasks[i].clone())));
            let store = on_remove.clone();
            Ok(Script::new()
                .io(Io::new(
                    Effect::new(move || async move { store.delete(id).await.map(|()| Value::Null) }),
                    move |deleted, draft| {
                        if let (Maybe::Fault(_), Some((index, task))) = (deleted, removed) {
                            let tasks = tasks_mut(draft)?;
                            let index = index.min(tasks.len());
                            tasks.insert(index, task);
                            draft.annotate(optimist::path!("tasks", index), Status::FAILED);
                        }
                        Ok(())
                    },
                ))
                .produce(move |draft| {
                    tasks_mut(draft)?.retain(|t| t["id"] != json!(id));
                    Ok(())
                }))
        })
        .on_broadcast("refresh", move |_, _| {
            let store = on_refresh.clone();
            Ok(Script::new().io(Io::new(
                Effect::new(move || async move { store.list().await.map(|tasks| json!(tasks)) }),
                |listed, draft| {
                    if let Some(tasks) = listed.into_result()? {
                        draft["tasks"] = tasks;
                    }
                    Ok(())
                },
            )))
        })
}

/// One line per task, with its status flags.
pub(crate) fn render(view: &View) -> Vec<String> {
    let tasks = view.root().at("tasks");
    let mut lines = vec![format!("tasks [{}]", tasks.status())];
    for task in tasks.items() {
        let Some(value) = task.value() else { continue };
        let id = match &value["id"] {
            Value::Null => "-".to_owned(),
            id => id.to_string(),
        };
        lines.push(format!(
            "  {:>3} {:<24} [{}]",
            id,
            value["summary"].as_str().unwrap_or_default(),
            task.status()
        ));
    }
    lines
}

fn print_view(title: &str, module: &Module) {
    println!("-- {}", title);
    for line in render(&module.inspect()) {
        println!("{}", line);
    }
}

pub(crate) fn demo(options: &Options, args: &Args) -> Result<()> {
    let module_options = options.module_options("todo")?;
    let store: Arc<dyn TaskStore> = Arc::new(MemoryStore::new(
        Duration::from_millis(args.latency_ms),
        args.fail,
    ));
    let module = Module::new(
        module_options,
        todo_controller(store),
        json!({"tasks": [], "loading": false}),
    );
    module.on_change(|change| {
        if let Change::Failed { process, error } = change {
            eprintln!("{} failed: {}", process, error);
        }
    });

    let interrupted = module.clone();
    ctrlc::set_handler(move || interrupted.abort_all()).context("setting interrupt handler")?;

    runtime().block_on(async {
        let app = App::new();
        app.attach(&module).await;

        if let Some(mount) = module.mount(Value::Null) {
            mount.await;
        }
        print_view("mounted", &module);

        let first = module.dispatch("add", json!("write the docs")).await;
        info!(outcome = ?first.outcome, "first task added");
        let first_id = module.current_state()["tasks"][0]["id"].clone();

        let handles = vec![
            module.dispatch("add", json!("review the diff")),
            module.dispatch("rename", json!({"id": first_id, "summary": "write better docs"})),
            module.dispatch("add", json!("ship it")),
        ];
        print_view("optimistic", &module);

        for handle in handles {
            let settlement = handle.await;
            info!(process = %settlement.process, outcome = ?settlement.outcome, "settled");
        }
        print_view("confirmed", &module);

        let remove = module.dispatch("remove", first_id);
        print_view("removing", &module);
        remove.await;

        let mut revision = module.revision();
        revision.borrow_and_update();
        app.broadcast("refresh", Value::Null).await;
        tokio::time::timeout(Duration::from_millis(args.latency_ms * 4 + 1000), revision.changed())
            .await
            .context("waiting for refresh")??;
        while !module.is_idle() {
            revision.changed().await?;
        }
        print_view("refreshed", &module);
        Ok::<(), anyhow::Error>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use optimist::{path, ModuleOptions, Outcome};

    fn module(fail: bool, tasks: Value) -> Module {
        let store = Arc::new(MemoryStore::new(Duration::from_millis(100), fail));
        Module::new(
            ModuleOptions::default(),
            todo_controller(store),
            json!({ "tasks": tasks }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn add_replaces_placeholder() {
        let module = module(false, json!([]));
        let handle = module.dispatch("add", json!("a"));
        assert!(module.is(&path!("tasks", 0), Status::PENDING | Status::ADDING));
        assert_eq!(
            render(&module.inspect())[1],
            format!("    - {:<24} [pending|adding|direct]", "a")
        );
        handle.await;
        assert_eq!(
            module.current_state()["tasks"],
            json!([{"id": 1, "summary": "a"}])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_add_is_annotated() {
        let module = module(true, json!([]));
        let settlement = module.dispatch("add", json!("a")).await;
        assert_eq!(settlement.outcome, Outcome::Completed { faults: 1 });
        assert_eq!(module.current_state()["tasks"], json!([]));
        assert!(module.is(&path!("tasks"), Status::FAILED));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_remove_restores_task() {
        let module = module(true, json!([{"id": 1, "summary": "a"}, {"id": 2, "summary": "b"}]));
        let handle = module.dispatch("remove", json!(2));
        assert!(module.is(&path!("tasks", 1), Status::REMOVING));
        handle.await;
        assert_eq!(module.current_state()["tasks"][1]["id"], json!(2));
        assert!(module.is(&path!("tasks", 1), Status::FAILED));
    }

    #[tokio::test(start_paused = true)]
    async fn mount_loads_tasks() {
        let store = Arc::new(MemoryStore::new(Duration::from_millis(10), false));
        store.create("from store").await.unwrap();
        let module = Module::new(
            ModuleOptions::default(),
            todo_controller(store),
            json!({"tasks": []}),
        );
        module.mount(Value::Null).unwrap().await;
        assert_eq!(
            module.current_state()["tasks"],
            json!([{"id": 1, "summary": "from store"}])
        );
    }

    #[test]
    fn bad_payload_fails_dispatch() {
        let module = module(false, json!([]));
        let settlement = futures_util::FutureExt::now_or_never(module.dispatch("rename", json!(1)));
        assert!(matches!(
            settlement.map(|s| s.outcome),
            Some(Outcome::Failed(_))
        ));
    }
}
