//! Assembles a task forest from a flat, ordered listing.

use std::collections::{HashMap, HashSet};

use entity::tasks;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskNode {
    pub task: tasks::Model,
    pub children: Vec<TaskNode>,
}

impl TaskNode {
    /// Number of tasks in this subtree, including the node itself.
    pub fn subtree_size(&self) -> usize {
        1 + self.children.iter().map(TaskNode::subtree_size).sum::<usize>()
    }
}

/// Groups `tasks` by parent in one pass, then attaches children depth-first.
///
/// Sibling order follows the input order. A task whose parent is absent from
/// the input is treated as a root; tasks caught in a parent cycle are surfaced
/// as roots as well so nothing is silently dropped.
pub fn build_forest(tasks: Vec<tasks::Model>) -> Vec<TaskNode> {
    let present: HashSet<Uuid> = tasks.iter().map(|task| task.id).collect();
    let mut order: Vec<Uuid> = Vec::with_capacity(tasks.len());
    let mut roots: Vec<tasks::Model> = Vec::new();
    let mut by_parent: HashMap<Uuid, Vec<tasks::Model>> = HashMap::new();

    for task in tasks {
        order.push(task.id);
        match task.parent_id.filter(|parent| present.contains(parent)) {
            Some(parent) => by_parent.entry(parent).or_default().push(task),
            None => roots.push(task),
        }
    }

    let mut forest: Vec<TaskNode> = roots
        .into_iter()
        .map(|task| attach(task, &mut by_parent))
        .collect();

    // Whatever is still indexed hangs off a cycle and was never reached from a root.
    for id in order {
        if by_parent.is_empty() {
            break;
        }
        let stranded = by_parent
            .values()
            .flatten()
            .find(|task| task.id == id)
            .map(|task| (task.parent_id, task.id));
        if let Some((Some(parent), task_id)) = stranded {
            if let Some(siblings) = by_parent.get_mut(&parent) {
                if let Some(pos) = siblings.iter().position(|task| task.id == task_id) {
                    let task = siblings.remove(pos);
                    if siblings.is_empty() {
                        by_parent.remove(&parent);
                    }
                    forest.push(attach(task, &mut by_parent));
                }
            }
        }
    }

    forest
}

fn attach(task: tasks::Model, by_parent: &mut HashMap<Uuid, Vec<tasks::Model>>) -> TaskNode {
    let children = by_parent
        .remove(&task.id)
        .unwrap_or_default()
        .into_iter()
        .map(|child| attach(child, by_parent))
        .collect();
    TaskNode { task, children }
}
