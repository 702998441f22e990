// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Intents of log records, grouped per value type.
//!
//! Present-tense intents (`ACTIVATE_ELEMENT`, `CREATE`, ...) are commands, past and progressive
//! tense intents (`ELEMENT_ACTIVATED`, `CREATING`, ...) are events.

use serde::{Deserialize, Serialize};

macro_rules! intent_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            commands: [$($command:ident),* $(,)?],
            events: [$($event:ident),* $(,)?] $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
            strum::Display,
            strum::IntoStaticStr,
        )]
        #[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($command,)*
            $($event,)*
        }

        impl $name {
            pub fn is_event(&self) -> bool {
                match self {
                    $(Self::$command => false,)*
                    $(Self::$event => true,)*
                }
            }
        }
    };
}

intent_enum! {
    ProcessInstanceIntent {
        commands: [ActivateElement, CompleteElement, TerminateElement],
        events: [
            ElementActivating,
            ElementActivated,
            ElementCompleting,
            ElementCompleted,
            ElementTerminating,
            ElementTerminated,
            SequenceFlowTaken,
        ],
    }
}

intent_enum! {
    ProcessInstanceCreationIntent {
        commands: [Create],
        events: [Created],
    }
}

intent_enum! {
    ProcessInstanceModificationIntent {
        commands: [Modify],
        events: [Modified],
    }
}

intent_enum! {
    ProcessEventIntent {
        commands: [],
        events: [Triggering, Triggered],
    }
}

intent_enum! {
    TimerIntent {
        commands: [Trigger],
        events: [Created, Triggered, Canceled],
    }
}

intent_enum! {
    /// Subscriptions as seen by the partition of the process instance.
    ProcessMessageSubscriptionIntent {
        commands: [Create, Correlate, Delete],
        events: [Creating, Created, Correlated, Deleting, Deleted],
    }
}

intent_enum! {
    /// Subscriptions as seen by the partition owning the correlation key.
    MessageSubscriptionIntent {
        commands: [Create, Correlate, Reject, Delete],
        events: [Created, Correlating, Correlated, Rejected, Deleted],
    }
}

intent_enum! {
    MessageIntent {
        commands: [Publish],
        events: [Published],
    }
}

intent_enum! {
    SignalIntent {
        commands: [Broadcast],
        events: [Broadcasted],
    }
}

intent_enum! {
    SignalSubscriptionIntent {
        commands: [],
        events: [Created, Deleted],
    }
}

intent_enum! {
    CommandDistributionIntent {
        commands: [Acknowledge, Release],
        events: [Started, Distributing, Acknowledged, Finished, Received, Released],
    }
}

intent_enum! {
    VariableIntent {
        commands: [],
        events: [Created, Updated],
    }
}

intent_enum! {
    IncidentIntent {
        commands: [],
        events: [Created],
    }
}

intent_enum! {
    ErrorIntent {
        commands: [],
        events: [Created],
    }
}

/// Intent of a log record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    derive_more::From,
    derive_more::Display,
)]
pub enum Intent {
    ProcessInstance(ProcessInstanceIntent),
    ProcessInstanceCreation(ProcessInstanceCreationIntent),
    ProcessInstanceModification(ProcessInstanceModificationIntent),
    ProcessEvent(ProcessEventIntent),
    Timer(TimerIntent),
    ProcessMessageSubscription(ProcessMessageSubscriptionIntent),
    MessageSubscription(MessageSubscriptionIntent),
    Message(MessageIntent),
    Signal(SignalIntent),
    SignalSubscription(SignalSubscriptionIntent),
    CommandDistribution(CommandDistributionIntent),
    Variable(VariableIntent),
    Incident(IncidentIntent),
    Error(ErrorIntent),
}

impl Intent {
    pub fn is_event(&self) -> bool {
        match self {
            Intent::ProcessInstance(i) => i.is_event(),
            Intent::ProcessInstanceCreation(i) => i.is_event(),
            Intent::ProcessInstanceModification(i) => i.is_event(),
            Intent::ProcessEvent(i) => i.is_event(),
            Intent::Timer(i) => i.is_event(),
            Intent::ProcessMessageSubscription(i) => i.is_event(),
            Intent::MessageSubscription(i) => i.is_event(),
            Intent::Message(i) => i.is_event(),
            Intent::Signal(i) => i.is_event(),
            Intent::SignalSubscription(i) => i.is_event(),
            Intent::CommandDistribution(i) => i.is_event(),
            Intent::Variable(i) => i.is_event(),
            Intent::Incident(i) => i.is_event(),
            Intent::Error(i) => i.is_event(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Intent::ProcessInstance(i) => i.into(),
            Intent::ProcessInstanceCreation(i) => i.into(),
            Intent::ProcessInstanceModification(i) => i.into(),
            Intent::ProcessEvent(i) => i.into(),
            Intent::Timer(i) => i.into(),
            Intent::ProcessMessageSubscription(i) => i.into(),
            Intent::MessageSubscription(i) => i.into(),
            Intent::Message(i) => i.into(),
            Intent::Signal(i) => i.into(),
            Intent::SignalSubscription(i) => i.into(),
            Intent::CommandDistribution(i) => i.into(),
            Intent::Variable(i) => i.into(),
            Intent::Incident(i) => i.into(),
            Intent::Error(i) => i.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use googletest::prelude::*;

    #[test]
    fn tense_decides_between_command_and_event() {
        assert!(!Intent::from(ProcessInstanceIntent::ActivateElement).is_event());
        assert!(Intent::from(ProcessInstanceIntent::ElementActivating).is_event());
        assert!(!Intent::from(CommandDistributionIntent::Acknowledge).is_event());
        assert!(Intent::from(CommandDistributionIntent::Distributing).is_event());
    }

    #[test]
    fn names_are_screaming_snake_case() {
        assert_that!(
            Intent::from(ProcessInstanceIntent::SequenceFlowTaken).name(),
            eq("SEQUENCE_FLOW_TAKEN")
        );
        assert_that!(
            Intent::from(ProcessMessageSubscriptionIntent::Creating).to_string(),
            eq("CREATING")
        );
    }
}
