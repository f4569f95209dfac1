use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::signals::{Signal, SignalBus};

/// Totals closer than this are reported as unchanged.
const WEIGHT_CHANGE_EPSILON_KG: f32 = 1.0e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ObjectId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleRole {
    Reference,
    Player,
}

impl ScaleRole {
    pub fn as_token(self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Player => "player",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "reference" => Some(Self::Reference),
            "player" => Some(Self::Player),
            _ => None,
        }
    }
}

impl fmt::Display for ScaleRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeighableObject {
    pub id: ObjectId,
    pub weight_kg: f32,
    pub is_reference: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ScaleRejected {
    #[error("object {object:?} does not belong on the {scale} scale")]
    WrongKind { object: ObjectId, scale: ScaleRole },
    #[error("object {object:?} has invalid weight {weight_kg}")]
    InvalidWeight { object: ObjectId, weight_kg: f32 },
    #[error("object {object:?} is not on the {scale} scale")]
    UnknownObject { object: ObjectId, scale: ScaleRole },
    #[error("room has no weight puzzle configured")]
    NoWeightPuzzle,
}

#[derive(Debug, Clone, Copy)]
struct Resting {
    weight_kg: f32,
    held: bool,
}

#[derive(Debug, Clone)]
pub struct Scale {
    role: ScaleRole,
    objects: BTreeMap<ObjectId, Resting>,
    current_weight_kg: f32,
}

impl Scale {
    pub fn new(role: ScaleRole) -> Self {
        Self {
            role,
            objects: BTreeMap::new(),
            current_weight_kg: 0.0,
        }
    }

    pub fn current_weight_kg(&self) -> f32 {
        self.current_weight_kg
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn accepts_reference_objects(&self) -> bool {
        self.role == ScaleRole::Reference
    }

    /// Returns the new total when it changed.
    pub fn place(&mut self, object: WeighableObject) -> Result<Option<f32>, ScaleRejected> {
        if object.is_reference != self.accepts_reference_objects() {
            return Err(ScaleRejected::WrongKind {
                object: object.id,
                scale: self.role,
            });
        }
        if !object.weight_kg.is_finite() || object.weight_kg < 0.0 {
            return Err(ScaleRejected::InvalidWeight {
                object: object.id,
                weight_kg: object.weight_kg,
            });
        }
        self.objects.insert(
            object.id,
            Resting {
                weight_kg: object.weight_kg,
                held: false,
            },
        );
        Ok(self.recalculate())
    }

    pub fn remove(&mut self, id: ObjectId) -> Result<Option<f32>, ScaleRejected> {
        if self.objects.remove(&id).is_none() {
            return Err(ScaleRejected::UnknownObject {
                object: id,
                scale: self.role,
            });
        }
        Ok(self.recalculate())
    }

    pub fn set_held(&mut self, id: ObjectId, held: bool) -> Result<Option<f32>, ScaleRejected> {
        let Some(resting) = self.objects.get_mut(&id) else {
            return Err(ScaleRejected::UnknownObject {
                object: id,
                scale: self.role,
            });
        };
        resting.held = held;
        Ok(self.recalculate())
    }

    fn recalculate(&mut self) -> Option<f32> {
        let total = self
            .objects
            .values()
            .filter(|resting| !resting.held)
            .map(|resting| resting.weight_kg)
            .sum::<f32>();
        if (total - self.current_weight_kg).abs() <= WEIGHT_CHANGE_EPSILON_KG {
            return None;
        }
        self.current_weight_kg = total;
        Some(total)
    }
}

#[derive(Debug, Clone)]
pub struct WeightPuzzle {
    reference: Scale,
    player: Scale,
    tolerance_kg: f32,
    matched: bool,
}

impl WeightPuzzle {
    pub fn new(tolerance_kg: f32) -> Self {
        Self {
            reference: Scale::new(ScaleRole::Reference),
            player: Scale::new(ScaleRole::Player),
            tolerance_kg,
            matched: false,
        }
    }

    pub fn scale(&self, role: ScaleRole) -> &Scale {
        match role {
            ScaleRole::Reference => &self.reference,
            ScaleRole::Player => &self.player,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.matched
    }

    /// Re-arms the match notification. Objects stay where they are, so a match only
    /// fires again on the next weight change.
    pub fn reset(&mut self) {
        if self.matched {
            info!("weight_puzzle_reset");
        }
        self.matched = false;
    }

    pub fn place(
        &mut self,
        role: ScaleRole,
        object: WeighableObject,
        bus: &mut SignalBus,
    ) -> Result<(), ScaleRejected> {
        let changed = self.scale_mut(role).place(object).inspect_err(|error| {
            warn!(scale = %role, error = %error, "scale_rejected_object");
        })?;
        self.after_change(role, changed, bus);
        Ok(())
    }

    pub fn remove(
        &mut self,
        role: ScaleRole,
        id: ObjectId,
        bus: &mut SignalBus,
    ) -> Result<(), ScaleRejected> {
        let changed = self.scale_mut(role).remove(id)?;
        self.after_change(role, changed, bus);
        Ok(())
    }

    pub fn set_held(
        &mut self,
        role: ScaleRole,
        id: ObjectId,
        held: bool,
        bus: &mut SignalBus,
    ) -> Result<(), ScaleRejected> {
        let changed = self.scale_mut(role).set_held(id, held)?;
        self.after_change(role, changed, bus);
        Ok(())
    }

    fn scale_mut(&mut self, role: ScaleRole) -> &mut Scale {
        match role {
            ScaleRole::Reference => &mut self.reference,
            ScaleRole::Player => &mut self.player,
        }
    }

    fn after_change(&mut self, role: ScaleRole, changed: Option<f32>, bus: &mut SignalBus) {
        let Some(weight_kg) = changed else {
            return;
        };
        debug!(scale = %role, weight_kg, "scale_weight_changed");
        bus.emit(Signal::ScaleWeightChanged {
            scale: role,
            weight_kg,
        });

        let reference_kg = self.reference.current_weight_kg();
        let player_kg = self.player.current_weight_kg();
        let within_tolerance = (reference_kg - player_kg).abs() <= self.tolerance_kg;
        if self.matched || reference_kg <= 0.0 || !within_tolerance {
            debug!(reference_kg, player_kg, "weights_not_matched");
            return;
        }
        self.matched = true;
        info!(reference_kg, player_kg, "weights_matched");
        bus.emit(Signal::WeightsMatched {
            weight_kg: reference_kg,
        });
    }
}
