//! Billing period date arithmetic
//!
//! Local fallbacks for when a payment provider does not report a period
//! end (PayPal's cancel endpoint returns no body). All math is calendar
//! based on UTC timestamps.

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime};

/// Build a date, clamping the day to the last valid day of the month
/// (Feb 29 anniversaries land on Feb 28 in non-leap years).
fn date_clamped(year: i32, month: Month, day: u8) -> Date {
    let mut day = day;
    loop {
        match Date::from_calendar_date(year, month, day) {
            Ok(d) => return d,
            Err(_) if day > 1 => day -= 1,
            // day == 1 is always valid for any month/year
            Err(_) => unreachable!("day 1 is valid for every month"),
        }
    }
}

/// The first anniversary of `created` strictly after `now`, keeping the
/// original month, day and time-of-day. Used for yearly plans: access
/// runs until the next renewal date that has not yet passed.
pub fn next_anniversary(created: OffsetDateTime, now: OffsetDateTime) -> OffsetDateTime {
    let mut year = now.year();
    let mut candidate = PrimitiveDateTime::new(
        date_clamped(year, created.month(), created.day()),
        created.time(),
    )
    .assume_utc();

    while candidate <= now {
        year += 1;
        candidate = PrimitiveDateTime::new(
            date_clamped(year, created.month(), created.day()),
            created.time(),
        )
        .assume_utc();
    }

    candidate
}

/// The 1st of the month after `now`, at the original creation
/// time-of-day. Used for monthly plans.
pub fn first_of_next_month(created: OffsetDateTime, now: OffsetDateTime) -> OffsetDateTime {
    let (year, month) = match now.month() {
        Month::December => (now.year() + 1, Month::January),
        m => (now.year(), m.next()),
    };

    // from_calendar_date with day 1 cannot fail
    let date = date_clamped(year, month, 1);
    PrimitiveDateTime::new(date, created.time()).assume_utc()
}

/// Shift a timestamp forward by whole calendar months, clamping the day
/// (Jan 31 + 1 month = Feb 28/29).
pub fn shift_months(from: OffsetDateTime, months: u32) -> OffsetDateTime {
    let total = from.month() as u32 - 1 + months;
    let year = from.year() + (total / 12) as i32;
    // month_index is 0-11 so the conversion cannot fail
    let month = Month::try_from((total % 12) as u8 + 1).unwrap_or(from.month());

    PrimitiveDateTime::new(date_clamped(year, month, from.day()), from.time()).assume_utc()
}
