// CSS selectors for campaign pages. The static set targets the exact hashed
// class names served in markup; the rendered set matches class fragments so it
// survives the hash suffix changing between deploys.

pub const STATIC_TITLE: &str = "h1.p-campaign-title";
pub const STATIC_DESCRIPTION: &str = "div.campaign-description_content__C1C_5";
pub const STATIC_PROGRESS: &str = "div.progress-meter_progressMeterHeading__A6Slt";
pub const STATIC_AMOUNT: &str = "div.hrt-disp-inline.progress-meter_largeType__L_4O8";
pub const STATIC_GOAL: &str = "span.hrt-text-body-sm.hrt-text-gray";
pub const STATIC_DONATION: &str = "div.hrt-avatar-lockup-content";
pub const STATIC_DONATION_AMOUNT: &str = "span.hrt-font-bold";
pub const STATIC_ORGANIZER: &str = "a[class*=\"campaign-byline\"], .campaign-organizer";
pub const STATIC_LOCATION: &str = "span[class*=\"location\"], div[class*=\"location\"]";

pub const DONATION_NAME: &str = "div";

pub const RENDERED_READY: &str = "h1";
pub const RENDERED_TITLE: &str = "h1.p-campaign-title, h1[class*=\"campaign-title\"]";
pub const RENDERED_DESCRIPTION: &str = "div[class*=\"campaign-description\"]";
pub const RENDERED_AMOUNT: &str = "div[class*=\"progress-meter\"] div[class*=\"largeType\"], .hrt-disp-inline";
pub const RENDERED_GOAL: &str = "span[class*=\"hrt-text-gray\"]";
pub const RENDERED_ORGANIZER: &str = STATIC_ORGANIZER;
pub const RENDERED_LOCATION: &str = STATIC_LOCATION;
pub const RENDERED_DONOR_COUNT: &str = "span[class*=\"donor-count\"], div[class*=\"donations-count\"]";
pub const RENDERED_SHARE_COUNT: &str = "span[class*=\"share-count\"]";
pub const RENDERED_DONATION: &str = "div[class*=\"avatar-lockup-content\"]";
pub const RENDERED_DONATION_AMOUNT: &str = "span[class*=\"font-bold\"]";
