use crate::catalog::types::{IntoValue, Value};

/// A relation on one column, used in where-conditions and only-if guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    In(String, Vec<Value>),
}

impl Clause {
    pub fn column(&self) -> &str {
        match self {
            Clause::Eq(c, _)
            | Clause::Ne(c, _)
            | Clause::Lt(c, _)
            | Clause::Lte(c, _)
            | Clause::Gt(c, _)
            | Clause::Gte(c, _)
            | Clause::In(c, _) => c,
        }
    }

    pub fn operator(&self) -> &'static str {
        match self {
            Clause::Eq(..) => "=",
            Clause::Ne(..) => "!=",
            Clause::Lt(..) => "<",
            Clause::Lte(..) => "<=",
            Clause::Gt(..) => ">",
            Clause::Gte(..) => ">=",
            Clause::In(..) => "IN",
        }
    }

    pub fn values(&self) -> &[Value] {
        match self {
            Clause::Eq(_, v)
            | Clause::Ne(_, v)
            | Clause::Lt(_, v)
            | Clause::Lte(_, v)
            | Clause::Gt(_, v)
            | Clause::Gte(_, v) => std::slice::from_ref(v),
            Clause::In(_, values) => values,
        }
    }
}

pub struct ColumnRef(String);

pub fn col(name: &str) -> ColumnRef {
    ColumnRef(name.to_string())
}

impl ColumnRef {
    pub fn eq(self, value: impl IntoValue) -> Clause {
        Clause::Eq(self.0, value.into_value())
    }

    pub fn neq(self, value: impl IntoValue) -> Clause {
        Clause::Ne(self.0, value.into_value())
    }

    pub fn lt(self, value: impl IntoValue) -> Clause {
        Clause::Lt(self.0, value.into_value())
    }

    pub fn lte(self, value: impl IntoValue) -> Clause {
        Clause::Lte(self.0, value.into_value())
    }

    pub fn gt(self, value: impl IntoValue) -> Clause {
        Clause::Gt(self.0, value.into_value())
    }

    pub fn gte(self, value: impl IntoValue) -> Clause {
        Clause::Gte(self.0, value.into_value())
    }

    pub fn in_<T: IntoValue>(self, values: impl IntoIterator<Item = T>) -> Clause {
        Clause::In(
            self.0,
            values.into_iter().map(IntoValue::into_value).collect(),
        )
    }
}
