/// Describes Vulkan resources which can be destroyed
///
/// Implementors must tolerate repeated calls: only the first call releases anything.
pub trait Destructible {
    /// Destroy the resource
    fn destroy(&mut self);
}
