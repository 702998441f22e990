// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use serde::{Deserialize, Serialize};

use cadence_types::errors::ErrorKind;
use cadence_types::identifiers::{Key, PartitionId};
use cadence_types::process::BpmnElementType;
use cadence_types::time::MillisSinceEpoch;
use cadence_types::Variables;

use crate::intent::Intent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInstanceRecord {
    pub bpmn_process_id: String,
    pub process_definition_key: Key,
    pub process_instance_key: Key,
    pub element_id: String,
    pub bpmn_element_type: BpmnElementType,
    /// Key of the flow scope instance, `None` for the process instance itself.
    pub flow_scope_key: Option<Key>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInstanceCreationRecord {
    pub bpmn_process_id: String,
    /// Set on `CREATED`, or on `CREATE` to pick a specific process version.
    pub process_definition_key: Option<Key>,
    pub process_instance_key: Option<Key>,
    pub variables: Variables,
    /// Elements to start at instead of the none start event.
    pub start_instructions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateInstruction {
    pub element_id: String,
    /// Disambiguates the flow scope instance to activate the element in.
    pub ancestor_scope_key: Option<Key>,
    /// Set as local variables of the flow scope of the activated element.
    pub variables: Variables,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInstanceModificationRecord {
    pub process_instance_key: Key,
    pub activate_instructions: Vec<ActivateInstruction>,
    pub terminate_instructions: Vec<Key>,
    /// Element instances created by the activate instructions, set on `MODIFIED`.
    pub activated_element_instance_keys: Vec<Key>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEventRecord {
    pub scope_key: Key,
    pub target_element_id: String,
    pub variables: Variables,
    pub process_definition_key: Key,
    pub process_instance_key: Key,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerRecord {
    pub element_instance_key: Key,
    pub process_instance_key: Key,
    pub process_definition_key: Key,
    pub due_date: MillisSinceEpoch,
    /// Remaining repetitions, `-1` for unbounded cycles.
    pub repetitions: i32,
    pub target_element_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMessageSubscriptionRecord {
    pub subscription_partition_id: PartitionId,
    pub process_instance_key: Key,
    pub element_instance_key: Key,
    pub bpmn_process_id: String,
    pub element_id: String,
    pub message_name: String,
    pub correlation_key: String,
    pub interrupting: bool,
    pub message_key: Option<Key>,
    pub variables: Variables,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSubscriptionRecord {
    pub process_instance_key: Key,
    pub element_instance_key: Key,
    pub bpmn_process_id: String,
    pub element_id: String,
    pub message_name: String,
    pub correlation_key: String,
    pub interrupting: bool,
    pub message_key: Option<Key>,
    pub variables: Variables,
}

impl ProcessMessageSubscriptionRecord {
    /// The subscription as sent to the partition owning the correlation key.
    pub fn to_message_subscription(&self) -> MessageSubscriptionRecord {
        MessageSubscriptionRecord {
            process_instance_key: self.process_instance_key,
            element_instance_key: self.element_instance_key,
            bpmn_process_id: self.bpmn_process_id.clone(),
            element_id: self.element_id.clone(),
            message_name: self.message_name.clone(),
            correlation_key: self.correlation_key.clone(),
            interrupting: self.interrupting,
            message_key: self.message_key,
            variables: self.variables.clone(),
        }
    }
}

impl MessageSubscriptionRecord {
    /// The subscription as sent back to the partition of the process instance.
    pub fn to_process_message_subscription(
        &self,
        subscription_partition_id: PartitionId,
    ) -> ProcessMessageSubscriptionRecord {
        ProcessMessageSubscriptionRecord {
            subscription_partition_id,
            process_instance_key: self.process_instance_key,
            element_instance_key: self.element_instance_key,
            bpmn_process_id: self.bpmn_process_id.clone(),
            element_id: self.element_id.clone(),
            message_name: self.message_name.clone(),
            correlation_key: self.correlation_key.clone(),
            interrupting: self.interrupting,
            message_key: self.message_key,
            variables: self.variables.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub name: String,
    pub correlation_key: String,
    pub variables: Variables,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub signal_name: String,
    pub variables: Variables,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSubscriptionRecord {
    pub signal_name: String,
    pub catch_event_id: String,
    pub catch_event_instance_key: Key,
    pub process_instance_key: Key,
    pub process_definition_key: Key,
    pub bpmn_process_id: String,
    pub interrupting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDistributionRecord {
    pub partition_id: PartitionId,
    pub value_type: ValueType,
    pub intent: Intent,
    /// Payload of the distributed command. Only kept on `STARTED`.
    pub command_value: Option<Box<RecordValue>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableRecord {
    pub name: String,
    pub value: serde_json::Value,
    pub scope_key: Key,
    pub process_instance_key: Key,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub error_kind: ErrorKind,
    pub error_message: String,
    pub bpmn_process_id: String,
    pub process_instance_key: Key,
    pub element_id: String,
    pub element_instance_key: Key,
    pub variable_scope_key: Option<Key>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_message: String,
    /// Position of the command which failed to process.
    pub error_event_position: u64,
    pub process_instance_key: Option<Key>,
}

/// Value of a log record. The variant decides the [`ValueType`].
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    derive_more::From,
    strum::EnumDiscriminants,
)]
#[strum_discriminants(
    name(ValueType),
    derive(Hash, Serialize, Deserialize, strum::Display, strum::IntoStaticStr),
    strum(serialize_all = "SCREAMING_SNAKE_CASE")
)]
pub enum RecordValue {
    ProcessInstance(ProcessInstanceRecord),
    ProcessInstanceCreation(ProcessInstanceCreationRecord),
    ProcessInstanceModification(ProcessInstanceModificationRecord),
    ProcessEvent(ProcessEventRecord),
    Timer(TimerRecord),
    ProcessMessageSubscription(ProcessMessageSubscriptionRecord),
    MessageSubscription(MessageSubscriptionRecord),
    Message(MessageRecord),
    Signal(SignalRecord),
    SignalSubscription(SignalSubscriptionRecord),
    CommandDistribution(CommandDistributionRecord),
    Variable(VariableRecord),
    Incident(IncidentRecord),
    Error(ErrorRecord),
}

impl RecordValue {
    pub fn value_type(&self) -> ValueType {
        ValueType::from(self)
    }

    /// The process instance this value belongs to, if any.
    pub fn process_instance_key(&self) -> Option<Key> {
        match self {
            RecordValue::ProcessInstance(v) => Some(v.process_instance_key),
            RecordValue::ProcessInstanceCreation(v) => v.process_instance_key,
            RecordValue::ProcessInstanceModification(v) => Some(v.process_instance_key),
            RecordValue::ProcessEvent(v) => Some(v.process_instance_key),
            RecordValue::Timer(v) => Some(v.process_instance_key),
            RecordValue::ProcessMessageSubscription(v) => Some(v.process_instance_key),
            RecordValue::SignalSubscription(v) => Some(v.process_instance_key),
            RecordValue::Variable(v) => Some(v.process_instance_key),
            RecordValue::Incident(v) => Some(v.process_instance_key),
            RecordValue::Error(v) => v.process_instance_key,
            // owned by the message partition, not by a process instance of this partition
            RecordValue::MessageSubscription(_)
            | RecordValue::Message(_)
            | RecordValue::Signal(_)
            | RecordValue::CommandDistribution(_) => None,
        }
    }
}
