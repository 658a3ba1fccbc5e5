use chrono::{Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone};

use crate::model::*;

use super::EngineError;

// ── Slot Algorithm ────────────────────────────────────────────────

/// Bookable slots of one agenda on one local calendar day.
///
/// The working window of the weekday is reduced by that weekday's breaks and
/// by `booked` (each extended by the agenda buffer), then cut into
/// back-to-back slots from the start of every free segment. Slots closer than
/// `min_advance_hours` to `now`, or further than `max_advance_days`, are
/// dropped. `max_advance_days == 0` means no horizon.
pub fn agenda_slots(
    agenda: &Agenda,
    date: NaiveDate,
    booked: &[Span],
    now: Ms,
) -> Result<Vec<Span>, EngineError> {
    let settings = &agenda.settings;
    let slot = agenda.slot_ms();
    if !settings.is_active || slot <= 0 {
        return Ok(Vec::new());
    }
    let weekday = date.weekday();
    let Some(day) = agenda.working_day(weekday) else {
        return Ok(Vec::new());
    };
    let offset = FixedOffset::east_opt(settings.utc_offset_minutes * 60)
        .ok_or_else(|| EngineError::validation("utc_offset_minutes out of range"))?;
    let local = |t: NaiveTime| local_instant(offset, date, t);

    let Some(window) = Span::checked(local(day.start)?, local(day.end)?) else {
        return Ok(Vec::new());
    };

    let mut breaks = Vec::new();
    for b in &settings.breaks {
        if !b.weekdays.is_empty() && !b.weekdays.contains(&weekday) {
            continue;
        }
        if let Some(span) = Span::checked(local(b.start)?, local(b.end)?) {
            breaks.push(span);
        }
    }
    breaks.sort_by_key(|s| s.start);
    let mut free = subtract_intervals(&[window], &merge_overlapping(&breaks));

    let buffer = agenda.buffer_ms();
    let mut busy: Vec<Span> = booked
        .iter()
        .map(|s| s.extended_by(buffer))
        .filter(|s| s.overlaps(&window))
        .collect();
    if !busy.is_empty() {
        busy.sort_by_key(|s| s.start);
        free = subtract_intervals(&free, &merge_overlapping(&busy));
    }

    let earliest = now + Ms::from(settings.min_advance_hours) * HOUR_MS;
    let latest = match settings.max_advance_days {
        0 => Ms::MAX,
        days => now.saturating_add(Ms::from(days) * DAY_MS),
    };

    let mut slots = Vec::new();
    for segment in free {
        let mut start = segment.start;
        while start + slot <= segment.end {
            if start >= earliest && start <= latest {
                slots.push(Span::new(start, start + slot));
            }
            start += slot;
        }
    }
    Ok(slots)
}

fn local_instant(offset: FixedOffset, date: NaiveDate, time: NaiveTime) -> Result<Ms, EngineError> {
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| EngineError::validation("local time does not map to an instant"))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted by start, `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;
    use ulid::Ulid;

    use super::*;

    const H: Ms = HOUR_MS;
    const M: Ms = MINUTE_MS;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    // Monday 2025-03-10 00:00 UTC
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn midnight_ms() -> Ms {
        parse_instant("2025-03-10T00:00:00Z").unwrap()
    }

    fn agenda(slot_minutes: u32) -> Agenda {
        Agenda {
            id: Ulid::new(),
            user_id: Ulid::new(),
            organization_id: Ulid::new(),
            settings: AgendaSettings {
                name: "Clínica".into(),
                working_hours: vec![WorkingDay {
                    weekday: Weekday::Mon,
                    start: hm(9, 0),
                    end: hm(12, 0),
                    enabled: true,
                }],
                slot_duration_minutes: slot_minutes,
                breaks: Vec::new(),
                min_advance_hours: 0,
                max_advance_days: 0,
                buffer_minutes: 0,
                utc_offset_minutes: 0,
                is_active: true,
            },
            created_at: 0,
            updated_at: 0,
        }
    }

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        assert_eq!(subtract_intervals(&base, &remove), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 250)];
        assert!(subtract_intervals(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![Span::new(100, 150), Span::new(200, 300)]
        );
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Span::new(0, 1000)];
        let remove = vec![Span::new(100, 200), Span::new(400, 500), Span::new(800, 900)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![Span::new(100, 300), Span::new(200, 400), Span::new(500, 600)];
        assert_eq!(
            merge_overlapping(&spans),
            vec![Span::new(100, 400), Span::new(500, 600)]
        );
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(100, 300)]);
    }

    // ── agenda_slots ─────────────────────────────────────

    #[test]
    fn empty_day_yields_full_grid() {
        let a = agenda(60);
        let slots = agenda_slots(&a, monday(), &[], 0).unwrap();
        let base = midnight_ms();
        assert_eq!(
            slots,
            vec![
                Span::new(base + 9 * H, base + 10 * H),
                Span::new(base + 10 * H, base + 11 * H),
                Span::new(base + 11 * H, base + 12 * H),
            ]
        );
    }

    #[test]
    fn closed_weekday_has_no_slots() {
        let a = agenda(30);
        let tuesday = monday().succ_opt().unwrap();
        assert!(agenda_slots(&a, tuesday, &[], 0).unwrap().is_empty());
    }

    #[test]
    fn inactive_agenda_has_no_slots() {
        let mut a = agenda(30);
        a.settings.is_active = false;
        assert!(agenda_slots(&a, monday(), &[], 0).unwrap().is_empty());
    }

    #[test]
    fn booked_appointment_and_buffer_are_removed() {
        let mut a = agenda(30);
        a.settings.buffer_minutes = 15;
        let base = midnight_ms();
        let booked = [Span::new(base + 10 * H, base + 10 * H + 30 * M)];
        let slots = agenda_slots(&a, monday(), &booked, 0).unwrap();
        let starts: Vec<Ms> = slots.iter().map(|s| (s.start - base) / M).collect();
        // 9:00 9:30 | booked 10:00-10:30 + 15m buffer | 10:45 11:15
        assert_eq!(starts, vec![540, 570, 645, 675]);
    }

    #[test]
    fn breaks_apply_only_on_listed_weekdays() {
        let mut a = agenda(60);
        a.settings.breaks.push(AgendaBreak {
            start: hm(10, 0),
            end: hm(11, 0),
            weekdays: vec![Weekday::Mon],
        });
        let base = midnight_ms();
        let slots = agenda_slots(&a, monday(), &[], 0).unwrap();
        assert_eq!(
            slots,
            vec![
                Span::new(base + 9 * H, base + 10 * H),
                Span::new(base + 11 * H, base + 12 * H),
            ]
        );

        a.settings.breaks[0].weekdays = vec![Weekday::Fri];
        assert_eq!(agenda_slots(&a, monday(), &[], 0).unwrap().len(), 3);
    }

    #[test]
    fn utc_offset_shifts_the_window() {
        let mut a = agenda(60);
        a.settings.utc_offset_minutes = -180;
        let slots = agenda_slots(&a, monday(), &[], 0).unwrap();
        assert_eq!(slots[0].start, parse_instant("2025-03-10T12:00:00Z").unwrap());
    }

    #[test]
    fn min_advance_drops_near_slots() {
        let mut a = agenda(60);
        a.settings.min_advance_hours = 2;
        let now = midnight_ms() + 8 * H;
        let slots = agenda_slots(&a, monday(), &[], now).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].start, midnight_ms() + 10 * H);
    }

    #[test]
    fn max_advance_drops_far_days() {
        let mut a = agenda(60);
        a.settings.max_advance_days = 1;
        let now = midnight_ms() - 3 * DAY_MS;
        assert!(agenda_slots(&a, monday(), &[], now).unwrap().is_empty());
        a.settings.max_advance_days = 0;
        assert_eq!(agenda_slots(&a, monday(), &[], now).unwrap().len(), 3);
    }

    #[test]
    fn partial_tail_segment_is_not_offered() {
        let a = agenda(50);
        let slots = agenda_slots(&a, monday(), &[], 0).unwrap();
        // 9:00-12:00 fits three 50-minute slots, 30 minutes left over.
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[2].end, midnight_ms() + 11 * H + 30 * M);
    }
}
