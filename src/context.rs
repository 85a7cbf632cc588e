//! Per-query state shared by every rule invocation.

use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use enumset::{EnumSet, EnumSetType};

use crate::model::Value;
use crate::problems::{ProblemKind, Problems};
use crate::schema::{Schemata, TypeSystem};

/// Hints describing which features the canonical plan uses; the driver only
/// enqueues the rules whose features are present.
#[derive(EnumSetType, Debug, Hash)]
pub enum PlanHint {
    HasCriteria,
    HasView,
    HasJoin,
    HasSubqueries,
}

/// Everything a rule may consult (or report to) besides the plan itself.
///
/// A context serves exactly one optimization run on one thread. Hints and
/// problems use interior mutability so rules can update them through the
/// shared reference they receive.
pub struct QueryContext {
    schemata: Rc<dyn Schemata>,
    type_system: TypeSystem,
    variables: HashMap<String, Value>,
    hints: Cell<EnumSet<PlanHint>>,
    problems: RefCell<Problems>,
}

impl QueryContext {
    pub fn new(schemata: Rc<dyn Schemata>) -> Self {
        Self {
            schemata,
            type_system: TypeSystem::new(),
            variables: HashMap::new(),
            hints: Cell::new(EnumSet::empty()),
            problems: RefCell::new(Problems::new()),
        }
    }

    pub fn with_hints(self, hints: EnumSet<PlanHint>) -> Self {
        self.hints.set(hints);
        self
    }

    pub fn with_variable<N: Into<String>>(mut self, name: N, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn schemata(&self) -> &dyn Schemata {
        &*self.schemata
    }

    pub fn type_system(&self) -> &TypeSystem {
        &self.type_system
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    pub fn hints(&self) -> EnumSet<PlanHint> {
        self.hints.get()
    }

    pub fn has_hint(&self, hint: PlanHint) -> bool {
        self.hints.get().contains(hint)
    }

    pub fn set_hint(&self, hint: PlanHint) {
        self.hints.set(self.hints.get() | hint);
    }

    /// Withdraw a hint once the feature it describes has been rewritten away.
    pub fn clear_hint(&self, hint: PlanHint) {
        self.hints.set(self.hints.get() - hint);
    }

    pub fn problems(&self) -> Ref<'_, Problems> {
        self.problems.borrow()
    }

    pub fn add_error(&self, kind: ProblemKind) {
        self.problems.borrow_mut().add_error(kind);
    }

    pub fn add_warning(&self, kind: ProblemKind) {
        self.problems.borrow_mut().add_warning(kind);
    }

    pub fn has_errors(&self) -> bool {
        self.problems.borrow().has_errors()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ImmutableSchemata;

    fn context() -> QueryContext {
        QueryContext::new(Rc::new(ImmutableSchemata::default()))
    }

    #[test]
    fn hints_can_be_set_and_cleared_through_a_shared_reference() {
        let ctx = context().with_hints(PlanHint::HasJoin | PlanHint::HasCriteria);
        assert!(ctx.has_hint(PlanHint::HasJoin));
        ctx.clear_hint(PlanHint::HasJoin);
        assert!(!ctx.has_hint(PlanHint::HasJoin));
        assert!(ctx.has_hint(PlanHint::HasCriteria));
        ctx.set_hint(PlanHint::HasView);
        assert!(ctx.has_hint(PlanHint::HasView));
    }

    #[test]
    fn problems_accumulate() {
        let ctx = context();
        assert!(!ctx.has_errors());
        ctx.add_error(ProblemKind::TableDoesNotExist("ghost".into()));
        assert!(ctx.has_errors());
        assert_eq!(ctx.problems().iter().count(), 1);
    }
}
