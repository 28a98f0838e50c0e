pub mod timer_set;

pub use timer_set::TimerSet;
