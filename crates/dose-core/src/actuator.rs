use crate::error::Result;

/// Pump rotation direction. Dispensing always runs forward; reverse is
/// reserved for priming and line-drain maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Raw H-bridge control for the four motors sharing one standby line.
///
/// Implementations are the hardware seam: the on-target build toggles the
/// driver pins, the bench build tracks pin state in memory. All methods
/// are short pin operations and must not block. `emergency_stop_all` is
/// legal from any task and preempts every head at once.
pub trait MotorActuator: Send + Sync {
    fn start(&self, head: u8, direction: Direction) -> Result<()>;
    fn stop(&self, head: u8) -> Result<()>;
    fn brake(&self, head: u8) -> Result<()>;
    fn emergency_stop_all(&self) -> Result<()>;
}
