mod cron;
mod tasks;
mod trigger;

use pest_derive::Parser;

pub use tasks::{NewTask, ScheduledTask, TaskRun, TaskType, TaskUpdate};
pub use trigger::Trigger;

#[derive(Parser)]
#[grammar = "schedule/schedule.pest"]
struct ScheduleParser;
