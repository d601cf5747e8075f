use super::*;
use slot_locker::models::{ActivationHandle, CandidateSlot};
use slot_locker::site;
use slot_locker::ReservationLocker;

fn candidate() -> CandidateSlot {
    CandidateSlot::new(
        "普通車ＡＭ",
        "01/20 (Tue)",
        ActivationHandle {
            locator: slot_link(1, 2),
        },
    )
}

fn locker() -> ReservationLocker {
    ReservationLocker::with_timings(instant_timings())
}

fn grid() -> String {
    grid_page(true, &[("普通車ＡＭ", "xoxxx")])
}

fn times() -> String {
    time_page(
        &[
            (false, "reserveTimeCheck_2_5", "08:00"),
            (true, "reserveTimeCheck_2_6", "08:30"),
            (true, "reserveTimeCheck_2_7", "09:00"),
        ],
        SUBMIT_PRIMARY,
    )
}

#[tokio::test]
async fn test_scenario_c_all_four_stages_complete() {
    let page = booking_site(grid(), times(), explanation_page(AGREE_PRIMARY));

    let outcome = locker().lock(&page, candidate()).await;

    assert!(outcome.success, "unexpected failure: {:?}", outcome.error_detail);
    assert_eq!(outcome.category, "普通車ＡＭ");
    assert_eq!(outcome.date, "01/20 (Tue)");
    assert_eq!(outcome.selected_time, "08:30");
    assert!(outcome.error_detail.is_none());
    assert_eq!(page.current(), MAIL_URL);
    assert_eq!(
        page.clicks(),
        vec![
            slot_link(1, 2),
            Locator::cell_of("reserveTimeCheck_2_6"),
            Locator::css("button[onclick*=\"showWarningPossibleCntOver\"]"),
            Locator::css("input[type=\"submit\"][value=\"同意する\"]"),
        ]
    );
}

#[tokio::test]
async fn test_scenario_d_missing_submit_fails_after_time_selection() {
    let page = booking_site(
        grid(),
        time_page(&[(true, "reserveTimeCheck_1_1", "13:00")], ""),
        explanation_page(AGREE_PRIMARY),
    );

    let outcome = locker().lock(&page, candidate()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.selected_time, "13:00");
    let detail = outcome.error_detail.expect("failure carries detail");
    assert!(detail.starts_with("Booking failed at time selection after"));
    assert!(detail.contains("seconds"));
    assert!(detail.contains("showWarningPossibleCntOver"));
    // Left where it stopped.
    assert_eq!(page.current(), TIME_URL);
}

#[tokio::test]
async fn test_text_fallbacks_for_submit_and_agree() {
    let page = booking_site(grid(), time_page(&[(true, "t1", "10:30")], SUBMIT_TEXT_ONLY), explanation_page(AGREE_ID_ONLY));

    let outcome = locker().lock(&page, candidate()).await;

    assert!(outcome.success);
    let clicks = page.clicks();
    assert!(clicks.contains(&Locator::text("button", "予約する")));
    assert!(clicks.contains(&Locator::css("input#ok")));
}

#[tokio::test]
async fn test_missing_agree_button_fails_at_agreement() {
    let page = booking_site(grid(), times(), explanation_page("<p>only text</p>"));

    let outcome = locker().lock(&page, candidate()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.selected_time, "08:30");
    let detail = outcome.error_detail.unwrap();
    assert!(detail.starts_with("Booking failed at procedure agreement"));
    assert!(detail.contains("input#ok"));
    assert_eq!(page.current(), EXPLANATION_URL);
}

#[tokio::test]
async fn test_wait_timeout_continues_to_next_stage() {
    // The slot click lands on a URL the time selection pattern does not match.
    let unexpected = "https://site.test/140007-u/reserve/timeSelect";
    let page = booking_site(grid(), times(), explanation_page(AGREE_PRIMARY))
        .with_page(unexpected, times())
        .on_click(slot_link(1, 2), ClickEffect::Navigate(unexpected.to_string()));

    let outcome = locker().lock(&page, candidate()).await;

    assert!(outcome.success, "unexpected failure: {:?}", outcome.error_detail);
    assert_eq!(outcome.selected_time, "08:30");
}

#[tokio::test]
async fn test_wait_timeout_then_missing_control_fails() {
    // Nothing happens on click: the wait runs out, the grid has no submit button.
    let page = booking_site(grid(), times(), explanation_page(AGREE_PRIMARY))
        .on_click(slot_link(1, 2), ClickEffect::Check(Locator::css("input#none")));

    let outcome = locker().lock(&page, candidate()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.selected_time, "Unknown");
    assert!(outcome.error_detail.unwrap().contains("予約する"));
}

#[tokio::test]
async fn test_vanished_slot_fails_at_selection() {
    let page = booking_site(grid_page(true, &[("普通車ＡＭ", "xxxxx")]), times(), explanation_page(AGREE_PRIMARY));

    let outcome = locker().lock(&page, candidate()).await;

    assert!(!outcome.success);
    assert!(outcome
        .error_detail
        .unwrap()
        .starts_with("Booking failed at slot selection"));
    assert!(page.clicks().is_empty());
}

#[tokio::test]
async fn test_no_enabled_time_clicks_first_cell() {
    let page = booking_site(
        grid(),
        time_page(&[(false, "a1", "08:00"), (false, "a2", "08:30")], SUBMIT_PRIMARY),
        explanation_page(AGREE_PRIMARY),
    );

    let outcome = locker().lock(&page, candidate()).await;

    assert!(outcome.success);
    assert_eq!(outcome.selected_time, "08:00");
    assert!(page.clicks().contains(&Locator::cell_of("a1")));
}

#[tokio::test]
async fn test_enabled_cell_without_checkbox_id_is_chosen() {
    let time = format!(
        "<html><body><table><tr>\
         <td class='disable'><input type='checkbox' class='checkbox_hide' id='a1'>\
         <label for='a1'>08:00</label></td>\
         <td class='enable'><input type='checkbox' class='checkbox_hide'></td>\
         </tr></table>{}</body></html>",
        SUBMIT_PRIMARY
    );
    let page = booking_site(grid(), time, explanation_page(AGREE_PRIMARY));

    let outcome = locker().lock(&page, candidate()).await;

    assert!(outcome.success, "unexpected failure: {:?}", outcome.error_detail);
    assert_eq!(outcome.selected_time, "Unknown time");
    assert!(page
        .clicks()
        .contains(&Locator::cell_of_nth(site::TIME_CHECKBOXES, 1)));
    assert!(!page.clicks().contains(&Locator::cell_of("a1")));
}

#[tokio::test]
async fn test_checkbox_outside_cell_is_forced() {
    let time = format!(
        "<html><body><input type='checkbox' class='checkbox_hide' id='loose'>{}</body></html>",
        SUBMIT_PRIMARY
    );
    let page = booking_site(grid(), time, explanation_page(AGREE_PRIMARY));

    let outcome = locker().lock(&page, candidate()).await;

    assert!(outcome.success);
    assert_eq!(outcome.selected_time, "First available");
    assert_eq!(page.site().forced, vec![Locator::owned_css("input[id='loose']")]);
}

#[tokio::test]
async fn test_no_time_checkboxes_is_not_fatal() {
    let time = format!("<html><body>{}</body></html>", SUBMIT_PRIMARY);
    let page = booking_site(grid(), time, explanation_page(AGREE_PRIMARY));

    let outcome = locker().lock(&page, candidate()).await;

    assert!(outcome.success);
    assert_eq!(outcome.selected_time, "Unknown");
}
