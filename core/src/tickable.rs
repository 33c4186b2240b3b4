use anyhow::Result;

/// Representation of X amount of ticks of the chipset clock.
///
/// One tick is one color clock (CCK), the granularity at which
/// memory bus slots are granted.
pub type Ticks = u64;

pub trait Tickable {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks>;
}
