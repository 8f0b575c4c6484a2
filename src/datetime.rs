//! 打包的日期时间
//!
//! 磁盘上日期和时间各占一个 i32：
//! - 日期：`YYYYMMDD`
//! - 时间：`HHMMSS`
//!
//! 均为 UTC，精度为秒。全零表示“未设置”。

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};

/// 打包的日期时间（磁盘格式）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct PackedDateTime {
    /// YYYYMMDD
    pub date: i32,
    /// HHMMSS
    pub time: i32,
}

impl PackedDateTime {
    /// 未设置的时间戳
    pub const UNSET: PackedDateTime = PackedDateTime { date: 0, time: 0 };

    /// 当前 UTC 时间
    pub fn now() -> Self {
        Self::from_naive(&Utc::now().naive_utc())
    }

    /// 从 chrono 时间打包
    pub fn from_naive(dt: &NaiveDateTime) -> Self {
        let date = dt.year() * 10000 + dt.month() as i32 * 100 + dt.day() as i32;
        let time = (dt.hour() * 10000 + dt.minute() * 100 + dt.second()) as i32;
        Self { date, time }
    }

    /// 是否已设置
    pub fn is_set(&self) -> bool {
        *self != Self::UNSET
    }

    /// 解包为 chrono 时间
    ///
    /// 未设置或字段越界时返回 `None`
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        if !self.is_set() || self.date < 0 || self.time < 0 {
            return None;
        }

        let year = self.date / 10000;
        let month = (self.date / 100 % 100) as u32;
        let day = (self.date % 100) as u32;
        let hour = (self.time / 10000) as u32;
        let minute = (self.time / 100 % 100) as u32;
        let second = (self.time % 100) as u32;

        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
    }
}
