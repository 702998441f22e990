// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use metrics::counter;
use tracing::{debug, warn};

use cadence_storage_api::timer_table::TimerInstance;
use cadence_storage_api::Transaction;
use cadence_types::expression::RepeatingInterval;
use cadence_types::identifiers::Key;
use cadence_types::process::{CatchEventKind, Process, TimerDefinition};
use cadence_types::Variables;
use cadence_wal_protocol::intent::TimerIntent;
use cadence_wal_protocol::value::TimerRecord;
use cadence_wal_protocol::RejectionType;

use crate::metric_definitions::PARTITION_TIMER_DUE_HANDLED;
use crate::partition::state_machine::behavior::event_trigger::{
    activate_element, can_trigger_element, triggering_process_event,
};
use crate::partition::state_machine::behavior::expression::EvaluationScope;
use crate::partition::state_machine::{
    element, CommandHandler, ProcessingError, StateMachineApplyContext,
};

pub(crate) struct OnTriggerTimerCommand {
    pub(crate) key: Key,
}

impl<'ctx, 's: 'ctx, S: Transaction> CommandHandler<&'ctx mut StateMachineApplyContext<'s, S>>
    for OnTriggerTimerCommand
{
    fn apply(self, ctx: &'ctx mut StateMachineApplyContext<'s, S>) -> Result<(), ProcessingError> {
        let key = self.key;
        let Some(TimerInstance { value: timer, .. }) = ctx.storage.get_timer(key)? else {
            ctx.reject(
                RejectionType::NotFound,
                format!(
                    "Expected to trigger timer with key '{key}', but no such timer was found"
                ),
            );
            return Ok(());
        };

        let element_instance_key = timer.element_instance_key;
        if !can_trigger_element(&*ctx.storage, element_instance_key, &timer.target_element_id)? {
            ctx.reject(
                RejectionType::InvalidState,
                format!(
                    "Expected to trigger timer with key '{key}', but its element instance \
                    '{element_instance_key}' can't be triggered by '{}'",
                    timer.target_element_id
                ),
            );
            return Ok(());
        }

        let process = ctx.process(timer.process_definition_key)?;
        ctx.append_event(key, TimerIntent::Triggered, timer.clone())?;
        counter!(PARTITION_TIMER_DUE_HANDLED).increment(1);

        let trigger = triggering_process_event(
            ctx,
            &process,
            timer.process_instance_key,
            element_instance_key,
            &timer.target_element_id,
            Variables::new(),
        )?;
        let scope = ctx
            .storage
            .get_element_instance(element_instance_key)?
            .ok_or(ProcessingError::MissingElementInstance(element_instance_key))?;
        activate_element(ctx, &process, &scope, trigger)?;

        let catch_event = element(&process, &timer.target_element_id)?;
        if !catch_event.interrupting && has_repetitions_left(timer.repetitions) {
            reschedule(ctx, &process, timer)?;
        }
        Ok(())
    }
}

fn has_repetitions_left(repetitions: i32) -> bool {
    repetitions == RepeatingInterval::INFINITE || repetitions > 1
}

/// Creates the next timer of a cycle, relative to the due date of the triggered one.
fn reschedule<S: Transaction>(
    ctx: &mut StateMachineApplyContext<'_, S>,
    process: &Process,
    timer: TimerRecord,
) -> Result<(), ProcessingError> {
    let catch_event = element(process, &timer.target_element_id)?;
    let CatchEventKind::Timer(TimerDefinition::Cycle(expression)) = &catch_event.event else {
        return Ok(());
    };

    let scope = EvaluationScope::load(&*ctx.storage, Some(timer.element_instance_key))?;
    let cycle = match ctx.expressions().evaluate_cycle(expression, &scope) {
        Ok(cycle) => cycle,
        Err(failure) => {
            warn!(
                element_id = %timer.target_element_id,
                "Timer cycle can't be evaluated anymore, the timer is not repeated: {failure}"
            );
            return Ok(());
        }
    };

    let repetitions = if timer.repetitions == RepeatingInterval::INFINITE {
        RepeatingInterval::INFINITE
    } else {
        timer.repetitions - 1
    };
    let next = TimerRecord {
        due_date: timer.due_date + cycle.interval,
        repetitions,
        ..timer
    };
    debug!(
        element_id = %next.target_element_id,
        due_date = %next.due_date,
        repetitions,
        "Repeat timer"
    );
    let key = ctx.next_key()?;
    let due_date = next.due_date;
    ctx.append_event(key, TimerIntent::Created, next)?;
    ctx.schedule_timer(due_date);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_while_repetitions_are_left() {
        assert!(has_repetitions_left(RepeatingInterval::INFINITE));
        assert!(has_repetitions_left(3));
        assert!(!has_repetitions_left(1));
        assert!(!has_repetitions_left(0));
    }
}
