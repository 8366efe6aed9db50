// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Result, TidalError};

use super::stage::{PhysicalStage, PhysicalStageEdge};

/// A directed acyclic graph of physical stages.
#[derive(Debug, Clone)]
pub struct StageDag {
    stages: Vec<PhysicalStage>,
    edges: Vec<PhysicalStageEdge>,
}

impl StageDag {
    /// Builds a DAG, validating that every edge endpoint exists and that the
    /// graph is acyclic.
    pub fn new(stages: Vec<PhysicalStage>, edges: Vec<PhysicalStageEdge>) -> Result<Self> {
        let ids: HashSet<&str> = stages.iter().map(|stage| stage.id.as_str()).collect();
        for edge in &edges {
            if !ids.contains(edge.src_stage_id.as_str())
                || !ids.contains(edge.dst_stage_id.as_str())
            {
                return Err(TidalError::Internal(format!(
                    "stage edge {} connects unknown stages {} -> {}",
                    edge.id, edge.src_stage_id, edge.dst_stage_id
                )));
            }
        }

        let dag = Self { stages, edges };
        if dag.topological_sort().len() != dag.stages.len() {
            return Err(TidalError::Internal(
                "the stage graph contains a cycle".to_string(),
            ));
        }
        Ok(dag)
    }

    /// All stages, in insertion order.
    pub fn stages(&self) -> &[PhysicalStage] {
        &self.stages
    }

    /// Looks up a stage by id.
    pub fn stage(&self, stage_id: &str) -> Result<&PhysicalStage> {
        self.stages
            .iter()
            .find(|stage| stage.id == stage_id)
            .ok_or_else(|| {
                TidalError::Internal(format!("stage {stage_id} does not exist in the plan"))
            })
    }

    /// Stages in topological order, parents before children.
    ///
    /// The sort is stable: among stages whose dependencies are satisfied,
    /// insertion order is preserved.
    pub fn topological_sort(&self) -> Vec<&PhysicalStage> {
        let mut in_degree: HashMap<&str, usize> = self
            .stages
            .iter()
            .map(|stage| (stage.id.as_str(), 0))
            .collect();
        for edge in &self.edges {
            *in_degree.get_mut(edge.dst_stage_id.as_str()).unwrap() += 1;
        }

        let mut ready: VecDeque<&PhysicalStage> = self
            .stages
            .iter()
            .filter(|stage| in_degree[stage.id.as_str()] == 0)
            .collect();
        let mut sorted = Vec::with_capacity(self.stages.len());
        while let Some(stage) = ready.pop_front() {
            sorted.push(stage);
            for edge in self.outgoing_edges_of(&stage.id) {
                let degree = in_degree.get_mut(edge.dst_stage_id.as_str()).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    // Re-scan in insertion order to keep the sort stable.
                    let next = self
                        .stages
                        .iter()
                        .find(|candidate| candidate.id == edge.dst_stage_id)
                        .unwrap();
                    ready.push_back(next);
                }
            }
        }
        sorted
    }

    /// Edges whose destination is the given stage.
    pub fn incoming_edges_of(&self, stage_id: &str) -> Vec<&PhysicalStageEdge> {
        self.edges
            .iter()
            .filter(|edge| edge.dst_stage_id == stage_id)
            .collect()
    }

    /// Edges whose source is the given stage.
    pub fn outgoing_edges_of(&self, stage_id: &str) -> Vec<&PhysicalStageEdge> {
        self.edges
            .iter()
            .filter(|edge| edge.src_stage_id == stage_id)
            .collect()
    }

    /// Every stage reachable downstream of the given stage, excluding itself.
    pub fn descendants_of(&self, stage_id: &str) -> HashSet<String> {
        let mut descendants = HashSet::new();
        let mut frontier: VecDeque<&str> = VecDeque::new();
        frontier.push_back(stage_id);
        while let Some(current) = frontier.pop_front() {
            for edge in self.outgoing_edges_of(current) {
                if descendants.insert(edge.dst_stage_id.clone()) {
                    frontier.push_back(edge.dst_stage_id.as_str());
                }
            }
        }
        descendants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::plan::stage::DataFlowModel;

    fn stage(id: &str, schedule_group: usize) -> PhysicalStage {
        PhysicalStage {
            id: id.to_string(),
            schedule_group_index: schedule_group,
            container_type: Default::default(),
            task_groups: vec![],
        }
    }

    fn edge(id: &str, src: &str, dst: &str) -> PhysicalStageEdge {
        PhysicalStageEdge {
            id: id.to_string(),
            src_stage_id: src.to_string(),
            dst_stage_id: dst.to_string(),
            data_flow: DataFlowModel::Pull,
        }
    }

    #[test]
    fn toposort_orders_parents_first() {
        let dag = StageDag::new(
            vec![stage("c", 1), stage("a", 0), stage("b", 0)],
            vec![edge("e1", "a", "b"), edge("e2", "b", "c")],
        )
        .unwrap();

        let order: Vec<&str> = dag
            .topological_sort()
            .iter()
            .map(|stage| stage.id.as_str())
            .collect();
        assert_eq!(vec!["a", "b", "c"], order);
    }

    #[test]
    fn cycle_is_rejected() {
        let result = StageDag::new(
            vec![stage("a", 0), stage("b", 0)],
            vec![edge("e1", "a", "b"), edge("e2", "b", "a")],
        );
        assert!(result.is_err());
    }

    #[test]
    fn dangling_edge_is_rejected() {
        let result = StageDag::new(vec![stage("a", 0)], vec![edge("e1", "a", "ghost")]);
        assert!(result.is_err());
    }

    #[test]
    fn descendants_cover_transitive_closure() {
        let dag = StageDag::new(
            vec![stage("a", 0), stage("b", 1), stage("c", 1), stage("d", 2)],
            vec![
                edge("e1", "a", "b"),
                edge("e2", "a", "c"),
                edge("e3", "b", "d"),
            ],
        )
        .unwrap();

        let descendants = dag.descendants_of("a");
        assert_eq!(3, descendants.len());
        assert!(descendants.contains("b"));
        assert!(descendants.contains("c"));
        assert!(descendants.contains("d"));
        assert!(dag.descendants_of("d").is_empty());
    }

    #[test]
    fn edge_queries() {
        let dag = StageDag::new(
            vec![stage("a", 0), stage("b", 1)],
            vec![edge("e1", "a", "b")],
        )
        .unwrap();

        assert_eq!(1, dag.outgoing_edges_of("a").len());
        assert!(dag.incoming_edges_of("a").is_empty());
        assert_eq!("e1", dag.incoming_edges_of("b")[0].id);
    }
}
