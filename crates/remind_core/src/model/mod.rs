mod frequency;
mod task;
mod user;

pub use frequency::{Frequency, WeekdaySet, parse_weekday, weekday_label};
pub use task::{CompletionEvent, NewTask, Task};
pub use user::User;
