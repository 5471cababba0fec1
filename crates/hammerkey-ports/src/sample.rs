/// Latest raw reading for one sensor.
///
/// The caller that owns the hardware hands a source to a key for the duration of one step, so a
/// key never holds on to hardware it does not own.
pub trait SampleSource {
    fn read(&mut self) -> i32;
}

impl<F> SampleSource for F
where
    F: FnMut() -> i32,
{
    fn read(&mut self) -> i32 {
        self()
    }
}
