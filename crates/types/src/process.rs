// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Compiled, executable view of a BPMN process.
//!
//! Parsing and validating process models is out of the scope of this crate. Models are put
//! together with the [`ProcessBuilder`] and registered in a [`ProcessRepository`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::expression::Expression;
use crate::identifiers::{Key, PartitionId};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumIs,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BpmnElementType {
    Process,
    SubProcess,
    EventSubProcess,
    StartEvent,
    EndEvent,
    IntermediateCatchEvent,
    BoundaryEvent,
    ReceiveTask,
    ServiceTask,
    EventBasedGateway,
    SequenceFlow,
}

impl BpmnElementType {
    /// Elements which contain other elements and own a variable scope.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            BpmnElementType::Process
                | BpmnElementType::SubProcess
                | BpmnElementType::EventSubProcess
        )
    }

    /// Activities may have boundary events attached.
    pub fn is_activity(&self) -> bool {
        matches!(
            self,
            BpmnElementType::SubProcess
                | BpmnElementType::ReceiveTask
                | BpmnElementType::ServiceTask
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerDefinition {
    /// ISO-8601 duration, relative to the activation time.
    Duration(Expression),
    /// ISO-8601 date time.
    Date(Expression),
    /// ISO-8601 repeating interval, e.g. `R3/PT10S`.
    Cycle(Expression),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::EnumIs)]
pub enum CatchEventKind {
    None,
    Message {
        name: Expression,
        correlation_key: Expression,
    },
    Timer(TimerDefinition),
    Signal {
        name: Expression,
    },
    Error {
        code: Option<String>,
    },
}

/// A catch event of an element, as seen from the element which opens the subscriptions for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchEventDefinition {
    pub element_id: String,
    pub element_type: BpmnElementType,
    pub kind: CatchEventKind,
    pub interrupting: bool,
    /// True for the start event of an event sub process.
    pub event_sub_process_start: bool,
}

impl CatchEventDefinition {
    pub fn message_name(&self) -> Option<&Expression> {
        match &self.kind {
            CatchEventKind::Message { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn correlation_key(&self) -> Option<&Expression> {
        match &self.kind {
            CatchEventKind::Message {
                correlation_key, ..
            } => Some(correlation_key),
            _ => None,
        }
    }

    pub fn timer(&self) -> Option<&TimerDefinition> {
        match &self.kind {
            CatchEventKind::Timer(timer) => Some(timer),
            _ => None,
        }
    }

    pub fn signal_name(&self) -> Option<&Expression> {
        match &self.kind {
            CatchEventKind::Signal { name } => Some(name),
            _ => None,
        }
    }

    pub fn is_boundary(&self) -> bool {
        self.element_type == BpmnElementType::BoundaryEvent
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub id: String,
    pub element_type: BpmnElementType,
    /// Id of the enclosing container, `None` for the process itself.
    pub flow_scope: Option<String>,
    pub event: CatchEventKind,
    pub interrupting: bool,
    /// Activity a boundary event is attached to.
    pub attached_to: Option<String>,
    pub multi_instance: bool,
    pub incoming: Vec<String>,
    pub outgoing: Vec<String>,
}

impl Element {
    fn new(id: String, element_type: BpmnElementType, flow_scope: Option<String>) -> Self {
        Self {
            id,
            element_type,
            flow_scope,
            event: CatchEventKind::None,
            interrupting: true,
            attached_to: None,
            multi_instance: false,
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceFlow {
    pub id: String,
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub bpmn_process_id: String,
    pub key: Key,
    pub version: u32,
    elements: BTreeMap<String, Element>,
    sequence_flows: BTreeMap<String, SequenceFlow>,
}

impl Process {
    pub fn root(&self) -> &Element {
        // the builder always inserts the root element
        &self.elements[&self.bpmn_process_id]
    }

    pub fn element(&self, id: &str) -> Option<&Element> {
        self.elements.get(id)
    }

    pub fn sequence_flow(&self, id: &str) -> Option<&SequenceFlow> {
        self.sequence_flows.get(id)
    }

    pub fn flow_scope_of(&self, id: &str) -> Option<&Element> {
        self.element(id)
            .and_then(|e| e.flow_scope.as_deref())
            .and_then(|scope| self.element(scope))
    }

    /// The flow scopes between the given element and the process root, both excluded, ordered
    /// from the outermost to the innermost one.
    pub fn flow_scope_chain(&self, id: &str) -> Vec<&Element> {
        let mut chain = Vec::new();
        let mut current = self.flow_scope_of(id);
        while let Some(scope) = current {
            if scope.element_type == BpmnElementType::Process {
                break;
            }
            chain.push(scope);
            current = self.flow_scope_of(&scope.id);
        }
        chain.reverse();
        chain
    }

    pub fn children<'a, 'b>(
        &'a self,
        scope_id: &'b str,
    ) -> impl Iterator<Item = &'a Element> + 'b
    where
        'a: 'b,
    {
        self.elements
            .values()
            .filter(move |e| e.flow_scope.as_deref() == Some(scope_id))
    }

    /// The start event which is taken when the given container is activated normally.
    pub fn none_start_event(&self, scope_id: &str) -> Option<&Element> {
        self.children(scope_id).find(|e| {
            e.element_type == BpmnElementType::StartEvent && e.event == CatchEventKind::None
        })
    }

    /// The start event of an event sub process.
    pub fn event_sub_process_start_event(&self, event_sub_process_id: &str) -> Option<&Element> {
        self.children(event_sub_process_id)
            .find(|e| e.element_type == BpmnElementType::StartEvent)
    }

    pub fn is_event_sub_process_start(&self, id: &str) -> bool {
        self.element(id)
            .is_some_and(|e| e.element_type == BpmnElementType::StartEvent)
            && self
                .flow_scope_of(id)
                .is_some_and(|s| s.element_type == BpmnElementType::EventSubProcess)
    }

    pub fn outgoing(&self, id: &str) -> Vec<&SequenceFlow> {
        self.element(id)
            .map(|e| {
                e.outgoing
                    .iter()
                    .filter_map(|f| self.sequence_flows.get(f))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn boundary_events<'a, 'b>(
        &'a self,
        activity_id: &'b str,
    ) -> impl Iterator<Item = &'a Element> + 'b
    where
        'a: 'b,
    {
        self.elements
            .values()
            .filter(move |e| e.attached_to.as_deref() == Some(activity_id))
    }

    /// All catch events for which the given element opens subscriptions when it is activated.
    pub fn catch_events(&self, id: &str) -> Vec<CatchEventDefinition> {
        let Some(element) = self.element(id) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        match element.element_type {
            BpmnElementType::IntermediateCatchEvent | BpmnElementType::ReceiveTask => {
                events.push(self.to_catch_event(element));
            }
            BpmnElementType::EventBasedGateway => {
                events.extend(
                    self.outgoing(id)
                        .into_iter()
                        .filter_map(|flow| self.element(&flow.target))
                        .map(|target| self.to_catch_event(target)),
                );
            }
            _ => {}
        }

        if element.element_type.is_activity() {
            events.extend(self.boundary_events(id).map(|e| self.to_catch_event(e)));
        }

        if element.element_type.is_container() {
            events.extend(
                self.children(id)
                    .filter(|c| c.element_type == BpmnElementType::EventSubProcess)
                    .filter_map(|c| self.event_sub_process_start_event(&c.id))
                    .map(|start| self.to_catch_event(start)),
            );
        }

        events.retain(|e| e.kind != CatchEventKind::None);
        events
    }

    fn to_catch_event(&self, element: &Element) -> CatchEventDefinition {
        CatchEventDefinition {
            element_id: element.id.clone(),
            element_type: element.element_type,
            kind: element.event.clone(),
            interrupting: element.interrupting,
            event_sub_process_start: self.is_event_sub_process_start(&element.id),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidProcessError {
    #[error("element '{0}' is defined more than once")]
    DuplicateElement(String),
    #[error("sequence flow refers to unknown element '{0}'")]
    UnknownFlowNode(String),
    #[error("boundary event '{0}' is attached to unknown activity '{1}'")]
    UnknownAttachment(String, String),
}

/// Puts together a [`Process`]. Elements are added to the scope which is currently open, which
/// is the process itself unless inside one of the `*sub_process` closures.
#[derive(Debug)]
pub struct ProcessBuilder {
    bpmn_process_id: String,
    scope: String,
    elements: Vec<Element>,
    flows: Vec<(String, String)>,
}

impl ProcessBuilder {
    pub fn new(bpmn_process_id: impl Into<String>) -> Self {
        let bpmn_process_id = bpmn_process_id.into();
        Self {
            scope: bpmn_process_id.clone(),
            elements: vec![Element::new(
                bpmn_process_id.clone(),
                BpmnElementType::Process,
                None,
            )],
            bpmn_process_id,
            flows: Vec::new(),
        }
    }

    fn add(mut self, id: impl Into<String>, element_type: BpmnElementType) -> Self {
        let element = Element::new(id.into(), element_type, Some(self.scope.clone()));
        self.elements.push(element);
        self
    }

    fn last_mut(&mut self) -> &mut Element {
        // the root element is always there
        let idx = self.elements.len() - 1;
        &mut self.elements[idx]
    }

    pub fn start_event(self, id: impl Into<String>) -> Self {
        self.add(id, BpmnElementType::StartEvent)
    }

    /// Start event of an event sub process.
    pub fn event_start_event(
        self,
        id: impl Into<String>,
        event: CatchEventKind,
        interrupting: bool,
    ) -> Self {
        let mut builder = self.add(id, BpmnElementType::StartEvent);
        let element = builder.last_mut();
        element.event = event;
        element.interrupting = interrupting;
        builder
    }

    pub fn end_event(self, id: impl Into<String>) -> Self {
        self.add(id, BpmnElementType::EndEvent)
    }

    pub fn service_task(self, id: impl Into<String>) -> Self {
        self.add(id, BpmnElementType::ServiceTask)
    }

    pub fn event_based_gateway(self, id: impl Into<String>) -> Self {
        self.add(id, BpmnElementType::EventBasedGateway)
    }

    pub fn receive_task(
        self,
        id: impl Into<String>,
        message_name: impl Into<Expression>,
        correlation_key: impl Into<Expression>,
    ) -> Self {
        let mut builder = self.add(id, BpmnElementType::ReceiveTask);
        builder.last_mut().event = CatchEventKind::Message {
            name: message_name.into(),
            correlation_key: correlation_key.into(),
        };
        builder
    }

    pub fn intermediate_catch_event(self, id: impl Into<String>, event: CatchEventKind) -> Self {
        let mut builder = self.add(id, BpmnElementType::IntermediateCatchEvent);
        builder.last_mut().event = event;
        builder
    }

    pub fn boundary_event(
        self,
        id: impl Into<String>,
        attached_to: impl Into<String>,
        event: CatchEventKind,
        interrupting: bool,
    ) -> Self {
        let mut builder = self.add(id, BpmnElementType::BoundaryEvent);
        let element = builder.last_mut();
        element.attached_to = Some(attached_to.into());
        element.event = event;
        element.interrupting = interrupting;
        builder
    }

    pub fn sub_process(self, id: impl Into<String>, f: impl FnOnce(Self) -> Self) -> Self {
        self.container(id.into(), BpmnElementType::SubProcess, false, f)
    }

    pub fn multi_instance_sub_process(
        self,
        id: impl Into<String>,
        f: impl FnOnce(Self) -> Self,
    ) -> Self {
        self.container(id.into(), BpmnElementType::SubProcess, true, f)
    }

    pub fn event_sub_process(self, id: impl Into<String>, f: impl FnOnce(Self) -> Self) -> Self {
        self.container(id.into(), BpmnElementType::EventSubProcess, false, f)
    }

    fn container(
        self,
        id: String,
        element_type: BpmnElementType,
        multi_instance: bool,
        f: impl FnOnce(Self) -> Self,
    ) -> Self {
        let mut builder = self.add(id.clone(), element_type);
        builder.last_mut().multi_instance = multi_instance;
        let outer_scope = std::mem::replace(&mut builder.scope, id);
        let mut builder = f(builder);
        builder.scope = outer_scope;
        builder
    }

    /// Connects two flow nodes with a sequence flow.
    pub fn flow(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.flows.push((source.into(), target.into()));
        self
    }

    pub fn build(self) -> Result<Process, InvalidProcessError> {
        let mut elements = BTreeMap::new();
        for element in self.elements {
            if elements.contains_key(&element.id) {
                return Err(InvalidProcessError::DuplicateElement(element.id));
            }
            elements.insert(element.id.clone(), element);
        }

        for element in elements.values() {
            if let Some(attached_to) = &element.attached_to {
                if !elements.contains_key(attached_to) {
                    return Err(InvalidProcessError::UnknownAttachment(
                        element.id.clone(),
                        attached_to.clone(),
                    ));
                }
            }
        }

        let mut sequence_flows = BTreeMap::new();
        for (source, target) in self.flows {
            let id = format!("{source}_to_{target}");
            for node in [&source, &target] {
                if !elements.contains_key(node) {
                    return Err(InvalidProcessError::UnknownFlowNode(node.clone()));
                }
            }
            if let Some(e) = elements.get_mut(&source) {
                e.outgoing.push(id.clone());
            }
            if let Some(e) = elements.get_mut(&target) {
                e.incoming.push(id.clone());
            }
            sequence_flows.insert(id.clone(), SequenceFlow { id, source, target });
        }

        Ok(Process {
            bpmn_process_id: self.bpmn_process_id,
            key: Key::from_raw(0),
            version: 0,
            elements,
            sequence_flows,
        })
    }
}

/// The deployed processes, shared by all partitions of a node.
#[derive(Debug, Clone, Default)]
pub struct ProcessRepository {
    by_key: BTreeMap<Key, Arc<Process>>,
    latest: BTreeMap<String, Key>,
}

impl ProcessRepository {
    /// Registers a new version of the process and returns its definition key. Definition keys
    /// live in the key space of the reserved partition [`PartitionId::MIN`].
    pub fn deploy(&mut self, mut process: Process) -> Key {
        let key = Key::from_parts(PartitionId::MIN, self.by_key.len() as u64 + 1);
        process.version = self
            .latest
            .get(&process.bpmn_process_id)
            .and_then(|k| self.by_key.get(k))
            .map(|p| p.version + 1)
            .unwrap_or(1);
        process.key = key;
        self.latest.insert(process.bpmn_process_id.clone(), key);
        self.by_key.insert(key, Arc::new(process));
        key
    }

    pub fn by_key(&self, key: Key) -> Option<&Arc<Process>> {
        self.by_key.get(&key)
    }

    pub fn latest(&self, bpmn_process_id: &str) -> Option<&Arc<Process>> {
        self.latest
            .get(bpmn_process_id)
            .and_then(|k| self.by_key.get(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use googletest::prelude::*;

    fn nested() -> Process {
        ProcessBuilder::new("process")
            .start_event("start")
            .sub_process("outer", |b| {
                b.start_event("outer_start")
                    .sub_process("inner", |b| {
                        b.start_event("inner_start")
                            .service_task("task")
                            .flow("inner_start", "task")
                    })
                    .flow("outer_start", "inner")
            })
            .boundary_event(
                "timeout",
                "outer",
                CatchEventKind::Timer(TimerDefinition::Duration("PT1M".into())),
                true,
            )
            .event_sub_process("on_msg", |b| {
                b.event_start_event(
                    "msg_start",
                    CatchEventKind::Message {
                        name: "msg".into(),
                        correlation_key: "=foo".into(),
                    },
                    false,
                )
            })
            .end_event("end")
            .flow("start", "outer")
            .flow("outer", "end")
            .build()
            .unwrap()
    }

    #[test]
    fn flow_scope_chain_is_outermost_first_and_excludes_root() {
        let process = nested();

        let chain: Vec<_> = process
            .flow_scope_chain("task")
            .into_iter()
            .map(|e| e.id.as_str())
            .collect();

        assert_that!(chain, eq(vec!["outer", "inner"]));
        assert_that!(process.flow_scope_chain("start"), empty());
    }

    #[test]
    fn catch_events_of_containers_and_activities() {
        let process = nested();

        let root_events = process.catch_events("process");
        assert_that!(root_events, len(eq(1)));
        assert_that!(root_events[0].element_id.as_str(), eq("msg_start"));
        assert!(root_events[0].event_sub_process_start);
        assert!(!root_events[0].interrupting);

        let outer_events = process.catch_events("outer");
        assert_that!(outer_events, len(eq(1)));
        assert!(outer_events[0].is_boundary());
        assert!(outer_events[0].timer().is_some());

        assert_that!(process.catch_events("task"), empty());
    }

    #[test]
    fn start_events_outlive_the_looked_up_scope_id() {
        let process = nested();

        let start = {
            let scope_id = String::from("inner");
            process.none_start_event(&scope_id)
        };
        let esp_start = {
            let scope_id = String::from("on_msg");
            process.event_sub_process_start_event(&scope_id)
        };

        assert_that!(start.map(|e| e.id.as_str()), some(eq("inner_start")));
        assert_that!(esp_start.map(|e| e.id.as_str()), some(eq("msg_start")));
        assert_that!(process.none_start_event("on_msg"), none());
    }

    #[test]
    fn event_based_gateway_subscribes_to_following_catch_events() {
        let process = ProcessBuilder::new("process")
            .start_event("start")
            .event_based_gateway("gateway")
            .intermediate_catch_event(
                "msg",
                CatchEventKind::Message {
                    name: "m".into(),
                    correlation_key: "=id".into(),
                },
            )
            .intermediate_catch_event(
                "timer",
                CatchEventKind::Timer(TimerDefinition::Duration("PT5S".into())),
            )
            .flow("start", "gateway")
            .flow("gateway", "msg")
            .flow("gateway", "timer")
            .build()
            .unwrap();

        let ids: Vec<_> = process
            .catch_events("gateway")
            .into_iter()
            .map(|e| e.element_id)
            .collect();

        assert_that!(ids, eq(vec!["msg".to_owned(), "timer".to_owned()]));
    }

    #[test]
    fn flows_must_reference_known_elements() {
        let result = ProcessBuilder::new("process")
            .start_event("start")
            .flow("start", "missing")
            .build();

        assert_that!(
            result,
            err(eq(InvalidProcessError::UnknownFlowNode("missing".to_owned())))
        );
    }

    #[test]
    fn redeploying_increments_version() {
        let mut repository = ProcessRepository::default();

        let first = repository.deploy(nested());
        let second = repository.deploy(nested());

        assert_that!(first, not(eq(second)));
        assert_that!(repository.latest("process").map(|p| p.version), some(eq(2)));
        assert_that!(repository.by_key(first).map(|p| p.version), some(eq(1)));
    }
}
