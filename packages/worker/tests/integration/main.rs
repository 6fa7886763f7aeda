mod download;
mod support;
mod upload;
