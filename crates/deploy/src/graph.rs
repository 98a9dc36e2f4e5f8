//! Dependency ordering of deployment tasks.
//!
//! Tasks are nodes; an edge `a -> b` exists when one of `a`'s tags appears in
//! `b`'s `depends_on_tags`. Tags are resolved once, through a reverse index,
//! when the graph is built.

use std::collections::{BTreeMap, BTreeSet};

use crate::{error::DeployError, task::DeploymentTask};

/// Directed graph over a task collection, indexed by declaration position.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: Vec<DeploymentTask>,
    /// `successors[a]` must run after `a`.
    successors: Vec<BTreeSet<usize>>,
    /// `predecessors[b]` must run before `b`.
    predecessors: Vec<BTreeSet<usize>>,
    /// Tag to the tasks declaring it.
    providers: BTreeMap<String, Vec<usize>>,
}

impl TaskGraph {
    /// Build the graph, failing on a contract declared twice or on a dependency
    /// tag that no task declares.
    pub fn new(tasks: Vec<DeploymentTask>) -> Result<Self, DeployError> {
        let mut contracts = BTreeSet::new();
        for task in &tasks {
            if !contracts.insert(task.contract_name.as_str()) {
                return Err(DeployError::DuplicateContract {
                    contract: task.contract_name.clone(),
                });
            }
        }

        let mut providers: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, task) in tasks.iter().enumerate() {
            for tag in &task.tags {
                providers.entry(tag.clone()).or_default().push(index);
            }
        }

        let mut successors = vec![BTreeSet::new(); tasks.len()];
        let mut predecessors = vec![BTreeSet::new(); tasks.len()];

        for (index, task) in tasks.iter().enumerate() {
            for tag in &task.depends_on_tags {
                let Some(sources) = providers.get(tag) else {
                    return Err(DeployError::UnresolvedTag {
                        tag: tag.clone(),
                        required_by: Some(task.contract_name.clone()),
                    });
                };

                // A task trivially satisfies a tag it declares itself.
                for &source in sources.iter().filter(|&&source| source != index) {
                    successors[source].insert(index);
                    predecessors[index].insert(source);
                }
            }
        }

        Ok(Self {
            tasks,
            successors,
            predecessors,
            providers,
        })
    }

    pub fn tasks(&self) -> &[DeploymentTask] {
        &self.tasks
    }

    /// A dependency-respecting order of every task.
    ///
    /// Kahn's algorithm; among ready tasks the earliest declared runs first, so
    /// the order is the same on every run.
    pub fn order(&self) -> Result<Vec<&DeploymentTask>, DeployError> {
        Ok(self
            .order_indices()?
            .into_iter()
            .map(|index| &self.tasks[index])
            .collect())
    }

    /// Tasks tagged `tag` plus everything they transitively depend on, in order.
    pub fn select(&self, tag: &str) -> Result<Vec<&DeploymentTask>, DeployError> {
        let roots = self
            .providers
            .get(tag)
            .ok_or_else(|| DeployError::UnresolvedTag {
                tag: tag.to_string(),
                required_by: None,
            })?;

        let mut selected = BTreeSet::new();
        let mut stack = roots.clone();
        while let Some(index) = stack.pop() {
            if selected.insert(index) {
                stack.extend(self.predecessors[index].iter().copied());
            }
        }

        Ok(self
            .order_indices()?
            .into_iter()
            .filter(|index| selected.contains(index))
            .map(|index| &self.tasks[index])
            .collect())
    }

    fn order_indices(&self) -> Result<Vec<usize>, DeployError> {
        let mut in_degree: Vec<usize> = self.predecessors.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.tasks.len())
            .filter(|&index| in_degree[index] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());

        while let Some(index) = ready.pop_first() {
            order.push(index);
            for &next in &self.successors[index] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() == self.tasks.len() {
            Ok(order)
        } else {
            Err(DeployError::CyclicDependency {
                contracts: self.cycle_members(&order),
            })
        }
    }

    /// Tasks left over after a partial topological sort, pruned of those that
    /// merely sit downstream of a cycle.
    fn cycle_members(&self, ordered: &[usize]) -> Vec<String> {
        let mut remaining: BTreeSet<usize> = (0..self.tasks.len()).collect();
        for index in ordered {
            remaining.remove(index);
        }

        loop {
            let sinks: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&index| self.successors[index].is_disjoint(&remaining))
                .collect();
            if sinks.is_empty() {
                break;
            }
            for sink in sinks {
                remaining.remove(&sink);
            }
        }

        remaining
            .into_iter()
            .map(|index| self.tasks[index].contract_name.clone())
            .collect()
    }
}

/// Order a task collection by tag dependency.
pub fn order(tasks: Vec<DeploymentTask>) -> Result<Vec<DeploymentTask>, DeployError> {
    let graph = TaskGraph::new(tasks)?;
    Ok(graph.order()?.into_iter().cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ALL_TAG;

    fn names(tasks: &[&DeploymentTask]) -> Vec<String> {
        tasks.iter().map(|task| task.contract_name.clone()).collect()
    }

    #[test]
    fn test_dependency_runs_first_regardless_of_declaration() {
        let tasks = vec![
            DeploymentTask::new("B").depends_on("base"),
            DeploymentTask::new("A").tag("base"),
        ];

        let graph = TaskGraph::new(tasks).unwrap();
        assert_eq!(names(&graph.order().unwrap()), vec!["A", "B"]);
    }

    #[test]
    fn test_independent_tasks_keep_declaration_order() {
        let tasks = vec![
            DeploymentTask::new("Greeter"),
            DeploymentTask::new("DropAlbum"),
            DeploymentTask::new("Vault"),
        ];

        let graph = TaskGraph::new(tasks).unwrap();
        assert_eq!(
            names(&graph.order().unwrap()),
            vec!["Greeter", "DropAlbum", "Vault"]
        );
    }

    #[test]
    fn test_tie_break_is_stable_around_dependencies() {
        // D depends on A; B and C are free. A ready task declared earlier
        // always wins, so D slots in as soon as A has run and D is the
        // earliest ready task.
        let tasks = vec![
            DeploymentTask::new("D").depends_on("A"),
            DeploymentTask::new("B"),
            DeploymentTask::new("A"),
            DeploymentTask::new("C"),
        ];

        let graph = TaskGraph::new(tasks).unwrap();
        assert_eq!(names(&graph.order().unwrap()), vec!["B", "A", "D", "C"]);
    }

    #[test]
    fn test_tag_shared_by_several_tasks() {
        let tasks = vec![
            DeploymentTask::new("Registry").depends_on("token"),
            DeploymentTask::new("TokenA").tag("token"),
            DeploymentTask::new("TokenB").tag("token"),
        ];

        let graph = TaskGraph::new(tasks).unwrap();
        assert_eq!(
            names(&graph.order().unwrap()),
            vec!["TokenA", "TokenB", "Registry"]
        );
    }

    #[test]
    fn test_duplicate_contract_rejected() {
        let tasks = vec![
            DeploymentTask::new("Greeter").arg("Hello, World!"),
            DeploymentTask::new("DropAlbum"),
            DeploymentTask::new("Greeter").arg("Hola"),
        ];

        assert_eq!(
            TaskGraph::new(tasks).unwrap_err(),
            DeployError::DuplicateContract {
                contract: "Greeter".to_string()
            }
        );
    }

    #[test]
    fn test_cycle_detected() {
        let tasks = vec![
            DeploymentTask::new("A").depends_on("B"),
            DeploymentTask::new("B").depends_on("A"),
            DeploymentTask::new("C").depends_on("A"),
            DeploymentTask::new("Free"),
        ];

        let graph = TaskGraph::new(tasks).unwrap();
        assert_eq!(
            graph.order().unwrap_err(),
            DeployError::CyclicDependency {
                contracts: vec!["A".to_string(), "B".to_string()]
            }
        );
    }

    #[test]
    fn test_depending_on_all_from_two_tasks_is_a_cycle() {
        let tasks = vec![
            DeploymentTask::new("A").depends_on(ALL_TAG),
            DeploymentTask::new("B").depends_on(ALL_TAG),
        ];

        assert!(matches!(
            TaskGraph::new(tasks).unwrap().order(),
            Err(DeployError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_self_tag_dependency_is_ignored() {
        let tasks = vec![
            DeploymentTask::new("A"),
            DeploymentTask::new("Final").depends_on(ALL_TAG),
        ];

        let graph = TaskGraph::new(tasks).unwrap();
        assert_eq!(names(&graph.order().unwrap()), vec!["A", "Final"]);
    }

    #[test]
    fn test_unresolved_tag() {
        let tasks = vec![DeploymentTask::new("Vault").depends_on("oracle")];

        assert_eq!(
            TaskGraph::new(tasks).unwrap_err(),
            DeployError::UnresolvedTag {
                tag: "oracle".to_string(),
                required_by: Some("Vault".to_string()),
            }
        );
    }

    #[test]
    fn test_select_by_tag() {
        let tasks = vec![
            DeploymentTask::new("DropAlbum").args(["TestDropAlbum", "TDA"]),
            DeploymentTask::new("Greeter").arg("Hello, World!"),
        ];
        let graph = TaskGraph::new(tasks).unwrap();

        assert_eq!(
            names(&graph.select(ALL_TAG).unwrap()),
            vec!["DropAlbum", "Greeter"]
        );
        assert_eq!(names(&graph.select("Greeter").unwrap()), vec!["Greeter"]);
        assert_eq!(
            graph.select("Nothing").unwrap_err(),
            DeployError::UnresolvedTag {
                tag: "Nothing".to_string(),
                required_by: None,
            }
        );
    }

    #[test]
    fn test_select_pulls_in_transitive_dependencies() {
        let tasks = vec![
            DeploymentTask::new("App").depends_on("Vault"),
            DeploymentTask::new("Vault").depends_on("Token"),
            DeploymentTask::new("Token"),
            DeploymentTask::new("Unrelated"),
        ];
        let graph = TaskGraph::new(tasks).unwrap();

        assert_eq!(
            names(&graph.select("App").unwrap()),
            vec!["Token", "Vault", "App"]
        );
    }

    #[test]
    fn test_order_free_function() {
        let ordered = order(vec![
            DeploymentTask::new("B").depends_on("A"),
            DeploymentTask::new("A"),
        ])
        .unwrap();

        assert_eq!(ordered[0].contract_name, "A");
        assert_eq!(ordered[1].contract_name, "B");
    }
}
