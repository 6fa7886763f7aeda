mod jobs;
mod motion;
mod support;
