//! Order and catalog persistence seam, plus an in-memory implementation.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;
use crate::order::{Dispenser, Dose, Ingredient, IngredientId, Mix, MixId, Order, OrderId};

/// Everything the controller needs from the catalog and order database.
///
/// Implementations must be safe to call from the worker thread while the
/// presentation layer reads concurrently.
pub trait OrderStore: Send + Sync {
    fn order(&self, id: OrderId) -> Result<Order, StoreError>;
    fn save_order(&self, order: &Order) -> Result<(), StoreError>;
    fn mix(&self, id: MixId) -> Result<Mix, StoreError>;
    /// Doses of a mix ascending by `number`.
    fn ordered_doses(&self, mix: MixId) -> Result<Vec<Dose>, StoreError> {
        Ok(self.mix(mix)?.ordered_doses())
    }
    fn ingredient(&self, id: IngredientId) -> Result<Ingredient, StoreError>;
    /// Dispensers loaded with `ingredient`, ascending by number, empty ones
    /// included.
    fn dispensers_for(&self, ingredient: IngredientId) -> Result<Vec<Dispenser>, StoreError>;
    fn set_dispenser_empty(&self, number: u8, empty: bool) -> Result<(), StoreError>;
}

/// Whether every poured ingredient of `mix` has a non-empty dispenser.
pub fn mix_available(store: &dyn OrderStore, mix: MixId) -> Result<bool, StoreError> {
    for dose in store.ordered_doses(mix)? {
        let ingredient = store.ingredient(dose.ingredient)?;
        if ingredient.added_separately {
            continue;
        }
        let usable = store
            .dispensers_for(ingredient.id)?
            .iter()
            .any(|d| d.is_usable_for(ingredient.id));
        if !usable {
            return Ok(false);
        }
    }
    Ok(true)
}

#[derive(Debug, Default)]
struct Tables {
    ingredients: BTreeMap<IngredientId, Ingredient>,
    dispensers: BTreeMap<u8, Dispenser>,
    mixes: BTreeMap<MixId, Mix>,
    orders: BTreeMap<OrderId, Order>,
    next_order: OrderId,
}

/// Mutex-protected maps; every call is one read-modify-write of one entity.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalog(catalog: &mixbot_config::Catalog) -> Self {
        let store = Self::new();
        {
            let mut t = store.lock();
            t.ingredients = catalog
                .ingredients
                .iter()
                .map(|i| (i.id, Ingredient::from(i)))
                .collect();
            t.dispensers = catalog
                .dispensers
                .iter()
                .map(|d| (d.number, Dispenser::from(d)))
                .collect();
            t.mixes = catalog
                .mixes
                .iter()
                .map(|m| (m.id, Mix::from(m)))
                .collect();
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_ingredient(&self, ingredient: Ingredient) {
        self.lock().ingredients.insert(ingredient.id, ingredient);
    }

    pub fn add_mix(&self, mix: Mix) {
        self.lock().mixes.insert(mix.id, mix);
    }

    /// Create a fresh order in `Init`. The caller then submits it with
    /// `Artist::accept_order`.
    pub fn create_order(&self, mix: Option<MixId>) -> Order {
        let mut t = self.lock();
        t.next_order += 1;
        let order = Order::new(t.next_order, mix);
        t.orders.insert(order.id, order.clone());
        order
    }

    /// Load (or unload, with `None`) a dispenser. Creates it if unknown.
    pub fn assign_dispenser(&self, number: u8, ingredient: Option<IngredientId>) {
        let mut t = self.lock();
        let d = t.dispensers.entry(number).or_insert(Dispenser {
            number,
            ingredient: None,
            is_empty: true,
        });
        d.assign(ingredient);
        if ingredient.is_some() {
            d.is_empty = false;
        }
    }

    pub fn dispensers(&self) -> Vec<Dispenser> {
        self.lock().dispensers.values().cloned().collect()
    }

    pub fn mixes(&self) -> Vec<Mix> {
        self.lock().mixes.values().cloned().collect()
    }

    pub fn mix_by_name(&self, name: &str) -> Option<Mix> {
        self.lock()
            .mixes
            .values()
            .find(|m| m.name.eq_ignore_ascii_case(name))
            .cloned()
    }
}

impl OrderStore for InMemoryStore {
    fn order(&self, id: OrderId) -> Result<Order, StoreError> {
        self.lock()
            .orders
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "order", id })
    }

    fn save_order(&self, order: &Order) -> Result<(), StoreError> {
        self.lock().orders.insert(order.id, order.clone());
        Ok(())
    }

    fn mix(&self, id: MixId) -> Result<Mix, StoreError> {
        self.lock()
            .mixes
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                kind: "mix",
                id: u64::from(id),
            })
    }

    fn ingredient(&self, id: IngredientId) -> Result<Ingredient, StoreError> {
        self.lock()
            .ingredients
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                kind: "ingredient",
                id: u64::from(id),
            })
    }

    fn dispensers_for(&self, ingredient: IngredientId) -> Result<Vec<Dispenser>, StoreError> {
        Ok(self
            .lock()
            .dispensers
            .values()
            .filter(|d| d.ingredient == Some(ingredient))
            .cloned()
            .collect())
    }

    fn set_dispenser_empty(&self, number: u8, empty: bool) -> Result<(), StoreError> {
        let mut t = self.lock();
        let d = t.dispensers.get_mut(&number).ok_or(StoreError::NotFound {
            kind: "dispenser",
            id: u64::from(number),
        })?;
        d.is_empty = empty;
        Ok(())
    }
}
