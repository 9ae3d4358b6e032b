// Licensed under the Apache-2.0 license

//! Lifecycle of the bank chosen as authoritative: an old-schema bank goes
//! through migration before the store serves it.

use dct_layout::SchemaId;
use smlang::statemachine;

statemachine! {
    derive_states: [Clone, Copy, Debug],
    transitions: {
        // syntax: CurrentState Event [guard] = NextState

        // a validated bank is either usable as is or needs migrating
        *Unvalidated + Validated(SchemaId) [is_current_schema] = ValidCurrentSchema,
        Unvalidated + Validated(SchemaId) [is_old_schema] = ValidOldSchema,

        // the converted copy is committed into the other bank
        ValidOldSchema + BeginMigration = Migrating,
        Migrating + Committed = ValidCurrentSchema,

        // any failure leaves the source authoritative
        Migrating + Aborted = ValidOldSchema,
    }
}

pub(crate) struct BankContext;

impl StateMachineContext for BankContext {
    fn is_current_schema(&self, schema: &SchemaId) -> Result<bool, ()> {
        Ok(schema.is_current())
    }

    fn is_old_schema(&self, schema: &SchemaId) -> Result<bool, ()> {
        Ok(!schema.is_current())
    }
}
