/// What the person in front of the screen asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Play,
    Pause,
    Quit,
}
