use std::{cmp::Ordering, fmt::Display};

use crate::{
    error::{DbError, Result},
    index::Index,
    record::{FieldType, Schema, TableScan, RID},
};

/// A field value: either a 32 bit int or a string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Int(i32),
    String(String),
}

impl Constant {
    pub fn field_type(&self) -> FieldType {
        match self {
            Constant::Int(_) => FieldType::Int,
            Constant::String(_) => FieldType::String,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.field_type().name()
    }

    pub fn as_int(&self) -> Result<i32> {
        match self {
            Constant::Int(v) => Ok(*v),
            Constant::String(_) => Err(DbError::TypeMismatch {
                expected: FieldType::Int.name(),
                found: self.type_name(),
            }),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Constant::String(v) => Ok(v),
            Constant::Int(_) => Err(DbError::TypeMismatch {
                expected: FieldType::String.name(),
                found: self.type_name(),
            }),
        }
    }

    /// The smallest value of a type, used as the first key of a B-tree directory
    pub fn min_value(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Int => Constant::Int(i32::MIN),
            FieldType::String => Constant::String(String::new()),
        }
    }

    /// Compare two constants of the same type. Mixed types are an error.
    pub fn compare(&self, other: &Constant) -> Result<Ordering> {
        self.partial_cmp(other).ok_or(DbError::TypeMismatch {
            expected: self.type_name(),
            found: other.type_name(),
        })
    }
}

/// Only constants of the same type are ordered
impl PartialOrd for Constant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Constant::Int(a), Constant::Int(b)) => Some(a.cmp(b)),
            (Constant::String(a), Constant::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Int(v) => write!(f, "{v}"),
            Constant::String(v) => write!(f, "'{v}'"),
        }
    }
}

impl From<i32> for Constant {
    fn from(value: i32) -> Self {
        Constant::Int(value)
    }
}

impl From<&str> for Constant {
    fn from(value: &str) -> Self {
        Constant::String(value.to_string())
    }
}

impl From<String> for Constant {
    fn from(value: String) -> Self {
        Constant::String(value)
    }
}

/// A read-only cursor over rows
pub trait Scan {
    fn before_first(&mut self) -> Result<()>;
    fn next(&mut self) -> Result<bool>;
    fn get_int(&self, field_name: &str) -> Result<i32>;
    fn get_string(&self, field_name: &str) -> Result<String>;
    fn get_val(&self, field_name: &str) -> Result<Constant>;
    fn has_field(&self, field_name: &str) -> bool;
    fn close(&mut self);

    fn as_update_scan(&self) -> Result<&dyn UpdateScan> {
        Err(DbError::NotUpdatable)
    }

    fn as_update_scan_mut(&mut self) -> Result<&mut dyn UpdateScan> {
        Err(DbError::NotUpdatable)
    }
}

/// A cursor that can also change the rows it visits
pub trait UpdateScan: Scan {
    fn set_int(&mut self, field_name: &str, value: i32) -> Result<()>;
    fn set_string(&mut self, field_name: &str, value: &str) -> Result<()>;
    fn set_val(&mut self, field_name: &str, value: &Constant) -> Result<()>;
    fn insert(&mut self) -> Result<()>;
    fn delete(&mut self) -> Result<()>;
    fn get_rid(&self) -> Result<RID>;
    fn move_to_rid(&mut self, rid: RID) -> Result<()>;
}

/// Either side of a term
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Constant(Constant),
    Field(String),
}

impl Expression {
    pub fn evaluate(&self, scan: &dyn Scan) -> Result<Constant> {
        match self {
            Expression::Constant(c) => Ok(c.clone()),
            Expression::Field(name) => scan.get_val(name),
        }
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Expression::Constant(c) => Some(c),
            Expression::Field(_) => None,
        }
    }

    pub fn as_field_name(&self) -> Option<&str> {
        match self {
            Expression::Field(name) => Some(name),
            Expression::Constant(_) => None,
        }
    }

    pub fn applies_to(&self, schema: &Schema) -> bool {
        match self {
            Expression::Constant(_) => true,
            Expression::Field(name) => schema.has_field(name),
        }
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Constant(c) => write!(f, "{c}"),
            Expression::Field(name) => write!(f, "{name}"),
        }
    }
}

/// An equality between two expressions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub lhs: Expression,
    pub rhs: Expression,
}

impl Term {
    pub fn new(lhs: Expression, rhs: Expression) -> Self {
        Self { lhs, rhs }
    }

    pub fn is_satisfied(&self, scan: &dyn Scan) -> Result<bool> {
        let lhs = self.lhs.evaluate(scan)?;
        let rhs = self.rhs.evaluate(scan)?;
        Ok(lhs.compare(&rhs)? == Ordering::Equal)
    }

    /// How much the term shrinks its input, given the number of distinct values of a field.
    /// Two unequal constants filter out everything.
    pub fn reduction_factor(&self, distinct_values: &dyn Fn(&str) -> usize) -> usize {
        match (&self.lhs, &self.rhs) {
            (Expression::Field(l), Expression::Field(r)) => {
                distinct_values(l).max(distinct_values(r))
            }
            (Expression::Field(l), Expression::Constant(_)) => distinct_values(l),
            (Expression::Constant(_), Expression::Field(r)) => distinct_values(r),
            (Expression::Constant(l), Expression::Constant(r)) => {
                if l == r {
                    1
                } else {
                    usize::MAX
                }
            }
        }
    }

    /// The constant the field is compared to, if the term has the form `field = c`
    pub fn equates_with_constant(&self, field_name: &str) -> Option<&Constant> {
        match (&self.lhs, &self.rhs) {
            (Expression::Field(f), Expression::Constant(c))
            | (Expression::Constant(c), Expression::Field(f))
                if f == field_name =>
            {
                Some(c)
            }
            _ => None,
        }
    }

    /// The other field, if the term has the form `field = other`
    pub fn equates_with_field(&self, field_name: &str) -> Option<&str> {
        match (&self.lhs, &self.rhs) {
            (Expression::Field(l), Expression::Field(r)) if l == field_name => Some(r),
            (Expression::Field(l), Expression::Field(r)) if r == field_name => Some(l),
            _ => None,
        }
    }

    pub fn applies_to(&self, schema: &Schema) -> bool {
        self.lhs.applies_to(schema) && self.rhs.applies_to(schema)
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}", self.lhs, self.rhs)
    }
}

/// A conjunction of terms. The empty predicate is always true.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    terms: Vec<Term>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn conjoin_with(&mut self, other: Predicate) {
        self.terms.extend(other.terms);
    }

    pub fn is_satisfied(&self, scan: &dyn Scan) -> Result<bool> {
        for term in &self.terms {
            if !term.is_satisfied(scan)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn reduction_factor(&self, distinct_values: &dyn Fn(&str) -> usize) -> usize {
        self.terms.iter().fold(1usize, |factor, term| {
            factor.saturating_mul(term.reduction_factor(distinct_values))
        })
    }

    /// The terms that can be evaluated against a table with this schema alone
    pub fn select_sub_pred(&self, schema: &Schema) -> Option<Predicate> {
        let terms: Vec<Term> = self
            .terms
            .iter()
            .filter(|t| t.applies_to(schema))
            .cloned()
            .collect();
        (!terms.is_empty()).then_some(Predicate { terms })
    }

    /// The terms that need both schemas to be evaluated
    pub fn join_sub_pred(&self, schema1: &Schema, schema2: &Schema) -> Option<Predicate> {
        let mut union = schema1.clone();
        for field in &schema2.fields {
            if !union.has_field(field) {
                union.add(field, schema2).ok()?;
            }
        }
        let terms: Vec<Term> = self
            .terms
            .iter()
            .filter(|t| !t.applies_to(schema1) && !t.applies_to(schema2) && t.applies_to(&union))
            .cloned()
            .collect();
        (!terms.is_empty()).then_some(Predicate { terms })
    }

    pub fn equates_with_constant(&self, field_name: &str) -> Option<&Constant> {
        self.terms
            .iter()
            .find_map(|t| t.equates_with_constant(field_name))
    }

    pub fn equates_with_field(&self, field_name: &str) -> Option<&str> {
        self.terms
            .iter()
            .find_map(|t| t.equates_with_field(field_name))
    }
}

impl From<Term> for Predicate {
    fn from(term: Term) -> Self {
        Self { terms: vec![term] }
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self.terms.iter().map(|t| t.to_string()).collect();
        write!(f, "{}", rendered.join(" and "))
    }
}

/// Rows of the child scan that satisfy a predicate.
/// Updates go through to the child when it is updatable.
pub struct SelectScan {
    scan: Box<dyn Scan>,
    predicate: Predicate,
}

impl SelectScan {
    pub fn new(scan: Box<dyn Scan>, predicate: Predicate) -> Self {
        Self { scan, predicate }
    }
}

impl Scan for SelectScan {
    fn before_first(&mut self) -> Result<()> {
        self.scan.before_first()
    }

    fn next(&mut self) -> Result<bool> {
        while self.scan.next()? {
            if self.predicate.is_satisfied(self.scan.as_ref())? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn get_int(&self, field_name: &str) -> Result<i32> {
        self.scan.get_int(field_name)
    }

    fn get_string(&self, field_name: &str) -> Result<String> {
        self.scan.get_string(field_name)
    }

    fn get_val(&self, field_name: &str) -> Result<Constant> {
        self.scan.get_val(field_name)
    }

    fn has_field(&self, field_name: &str) -> bool {
        self.scan.has_field(field_name)
    }

    fn close(&mut self) {
        self.scan.close();
    }

    fn as_update_scan(&self) -> Result<&dyn UpdateScan> {
        self.scan.as_update_scan()?;
        Ok(self)
    }

    fn as_update_scan_mut(&mut self) -> Result<&mut dyn UpdateScan> {
        self.scan.as_update_scan_mut()?;
        Ok(self)
    }
}

impl UpdateScan for SelectScan {
    fn set_int(&mut self, field_name: &str, value: i32) -> Result<()> {
        self.scan.as_update_scan_mut()?.set_int(field_name, value)
    }

    fn set_string(&mut self, field_name: &str, value: &str) -> Result<()> {
        self.scan.as_update_scan_mut()?.set_string(field_name, value)
    }

    fn set_val(&mut self, field_name: &str, value: &Constant) -> Result<()> {
        self.scan.as_update_scan_mut()?.set_val(field_name, value)
    }

    fn insert(&mut self) -> Result<()> {
        self.scan.as_update_scan_mut()?.insert()
    }

    fn delete(&mut self) -> Result<()> {
        self.scan.as_update_scan_mut()?.delete()
    }

    fn get_rid(&self) -> Result<RID> {
        self.scan.as_update_scan()?.get_rid()
    }

    fn move_to_rid(&mut self, rid: RID) -> Result<()> {
        self.scan.as_update_scan_mut()?.move_to_rid(rid)
    }
}

/// The child scan restricted to a list of fields
pub struct ProjectScan {
    scan: Box<dyn Scan>,
    fields: Vec<String>,
}

impl ProjectScan {
    pub fn new(scan: Box<dyn Scan>, fields: Vec<String>) -> Self {
        Self { scan, fields }
    }

    fn check(&self, field_name: &str) -> Result<()> {
        if self.has_field(field_name) {
            Ok(())
        } else {
            Err(DbError::ColumnNotFound(field_name.to_string()))
        }
    }
}

impl Scan for ProjectScan {
    fn before_first(&mut self) -> Result<()> {
        self.scan.before_first()
    }

    fn next(&mut self) -> Result<bool> {
        self.scan.next()
    }

    fn get_int(&self, field_name: &str) -> Result<i32> {
        self.check(field_name)?;
        self.scan.get_int(field_name)
    }

    fn get_string(&self, field_name: &str) -> Result<String> {
        self.check(field_name)?;
        self.scan.get_string(field_name)
    }

    fn get_val(&self, field_name: &str) -> Result<Constant> {
        self.check(field_name)?;
        self.scan.get_val(field_name)
    }

    fn has_field(&self, field_name: &str) -> bool {
        self.fields.iter().any(|f| f == field_name)
    }

    fn close(&mut self) {
        self.scan.close();
    }
}

/// Every combination of a row from the left scan with a row from the right scan
pub struct ProductScan {
    lhs: Box<dyn Scan>,
    rhs: Box<dyn Scan>,
    lhs_valid: bool,
}

impl ProductScan {
    pub fn new(lhs: Box<dyn Scan>, rhs: Box<dyn Scan>) -> Result<Self> {
        let mut scan = Self {
            lhs,
            rhs,
            lhs_valid: false,
        };
        scan.before_first()?;
        Ok(scan)
    }

    fn side(&self, field_name: &str) -> Result<&dyn Scan> {
        if self.lhs.has_field(field_name) {
            Ok(self.lhs.as_ref())
        } else if self.rhs.has_field(field_name) {
            Ok(self.rhs.as_ref())
        } else {
            Err(DbError::FieldNotFound(field_name.to_string()))
        }
    }
}

impl Scan for ProductScan {
    fn before_first(&mut self) -> Result<()> {
        self.lhs.before_first()?;
        self.lhs_valid = self.lhs.next()?;
        self.rhs.before_first()
    }

    fn next(&mut self) -> Result<bool> {
        if !self.lhs_valid {
            return Ok(false);
        }
        if self.rhs.next()? {
            return Ok(true);
        }
        self.rhs.before_first()?;
        self.lhs_valid = self.lhs.next()?;
        Ok(self.lhs_valid && self.rhs.next()?)
    }

    fn get_int(&self, field_name: &str) -> Result<i32> {
        self.side(field_name)?.get_int(field_name)
    }

    fn get_string(&self, field_name: &str) -> Result<String> {
        self.side(field_name)?.get_string(field_name)
    }

    fn get_val(&self, field_name: &str) -> Result<Constant> {
        self.side(field_name)?.get_val(field_name)
    }

    fn has_field(&self, field_name: &str) -> bool {
        self.lhs.has_field(field_name) || self.rhs.has_field(field_name)
    }

    fn close(&mut self) {
        self.lhs.close();
        self.rhs.close();
    }
}

/// The rows of a table whose indexed field equals a value, found through the index
pub struct IndexSelectScan {
    table_scan: TableScan,
    index: Box<dyn Index>,
    value: Constant,
}

impl IndexSelectScan {
    pub fn new(table_scan: TableScan, index: Box<dyn Index>, value: Constant) -> Result<Self> {
        let mut scan = Self {
            table_scan,
            index,
            value,
        };
        scan.before_first()?;
        Ok(scan)
    }
}

impl Scan for IndexSelectScan {
    fn before_first(&mut self) -> Result<()> {
        self.index.before_first(&self.value)
    }

    fn next(&mut self) -> Result<bool> {
        if !self.index.next()? {
            return Ok(false);
        }
        let rid = self.index.get_data_rid()?;
        self.table_scan.move_to_rid(rid)?;
        Ok(true)
    }

    fn get_int(&self, field_name: &str) -> Result<i32> {
        self.table_scan.get_int(field_name)
    }

    fn get_string(&self, field_name: &str) -> Result<String> {
        self.table_scan.get_string(field_name)
    }

    fn get_val(&self, field_name: &str) -> Result<Constant> {
        self.table_scan.get_val(field_name)
    }

    fn has_field(&self, field_name: &str) -> bool {
        self.table_scan.has_field(field_name)
    }

    fn close(&mut self) {
        self.index.close();
        self.table_scan.close();
    }
}
