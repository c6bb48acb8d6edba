//! Orders and the catalog entities they reference.

use std::fmt;

use serde::Serialize;

use crate::error::{AbandonReason, BarError};

pub type OrderId = u64;
pub type MixId = u32;
pub type IngredientId = u32;

/// Lifecycle of an order. Only forward transitions are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum OrderStatus {
    Init = 0,
    WaitingToStart = 1,
    Serving = 2,
    Finished = 3,
    Abandoned = 4,
}

impl OrderStatus {
    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::Init => "Init",
            OrderStatus::WaitingToStart => "Press button to start",
            OrderStatus::Serving => "Serving",
            OrderStatus::Finished => "Finished",
            OrderStatus::Abandoned => "Abandoned",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Finished | OrderStatus::Abandoned)
    }

    pub fn can_advance_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Init, WaitingToStart) | (WaitingToStart, Serving) | (Serving, Finished) => true,
            (from, Abandoned) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<OrderStatus> for u8 {
    fn from(s: OrderStatus) -> Self {
        s as u8
    }
}

impl TryFrom<u8> for OrderStatus {
    type Error = BarError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Ok(match v {
            0 => OrderStatus::Init,
            1 => OrderStatus::WaitingToStart,
            2 => OrderStatus::Serving,
            3 => OrderStatus::Finished,
            4 => OrderStatus::Abandoned,
            other => return Err(BarError::State(format!("unknown order status {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub mix: Option<MixId>,
    pub status: OrderStatus,
    pub accepted: bool,
    pub doses_served: u32,
    pub abandon_reason: Option<AbandonReason>,
}

impl Order {
    pub fn new(id: OrderId, mix: Option<MixId>) -> Self {
        Self {
            id,
            mix,
            status: OrderStatus::Init,
            accepted: false,
            doses_served: 0,
            abandon_reason: None,
        }
    }

    pub fn advance_to(&mut self, next: OrderStatus) -> Result<(), BarError> {
        if !self.status.can_advance_to(next) {
            return Err(BarError::State(format!(
                "order {}: {} -> {} is not allowed",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ingredient {
    pub id: IngredientId,
    pub name: String,
    /// Nothing to pour; the operator adds it by hand
    pub added_separately: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dispenser {
    pub number: u8,
    pub ingredient: Option<IngredientId>,
    pub is_empty: bool,
}

impl Dispenser {
    /// Load a dispenser with an ingredient; clearing the assignment marks it
    /// empty.
    pub fn assign(&mut self, ingredient: Option<IngredientId>) {
        self.ingredient = ingredient;
        if ingredient.is_none() {
            self.is_empty = true;
        }
    }

    pub fn is_usable_for(&self, ingredient: IngredientId) -> bool {
        !self.is_empty && self.ingredient == Some(ingredient)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dose {
    pub ingredient: IngredientId,
    pub quantity: f64,
    /// Pour order within the mix
    pub number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mix {
    pub id: MixId,
    pub name: String,
    pub doses: Vec<Dose>,
}

impl Mix {
    pub fn ordered_doses(&self) -> Vec<Dose> {
        let mut doses = self.doses.clone();
        doses.sort_by_key(|d| d.number);
        doses
    }
}
