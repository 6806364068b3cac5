use core::any::Any;

pub trait UxxExt {
    type Half;

    fn low(self) -> Self::Half;
    fn high(self) -> Self::Half;
}

impl UxxExt for u16 {
    type Half = u8;

    fn low(self) -> u8 {
        let mask = (1 << 8) - 1;
        (self & mask) as u8
    }

    fn high(self) -> u8 {
        (self >> 8) as u8
    }
}

impl UxxExt for u32 {
    type Half = u16;

    fn low(self) -> u16 {
        let mask = (1 << 16) - 1;
        (self & mask) as u16
    }

    fn high(self) -> u16 {
        (self >> 16) as u16
    }
}

/// Upcast to `dyn Any`; lets a `dyn Layer` be downcast to its concrete type
pub trait AsAny: Any {
    /// Returns `self` as `&dyn Any`
    fn as_any(&self) -> &dyn Any;

    /// Returns `self` as `&mut dyn Any`
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> AsAny for T
where
    T: Any,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
